//! Distributed integer mean
//!
//! The orchestrator shares every parcel among the parties, hands each party
//! one share per parcel and recombines the parties' partial quotients and
//! remainders into the floor of the arithmetic mean.

use super::{IntProtocol, ProtocolState};
use crate::arith::{mod_sum, to_signed};
use crate::config::RunConfig;
use crate::party::{MeanParty, Party};
use crate::sharing::generate_shares;
use crate::{
    BroadcastAgent, Error, Parameters, PartialResult, PartyId, Result, Share, Timings,
};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, instrument, warn};

/// Bound on waiting for a failed party task to report why it stopped
const FAILURE_REPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Orchestrator-side ends of the link to one party
struct PartyLink {
    id: PartyId,
    shares: oneshot::Sender<Vec<Share>>,
    reply: oneshot::Receiver<PartialResult>,
    handle: JoinHandle<Result<()>>,
}

/// Secure multi-party integer mean in the commodity model
pub struct DistributedIntMean {
    config: RunConfig,
    state: ProtocolState,
    params: Option<Arc<Parameters>>,
    parcel_count: usize,
    /// One row per parcel, one column per party
    shares: Vec<Vec<Share>>,
    links: Vec<PartyLink>,
    agent: Option<Arc<BroadcastAgent>>,
    result: Option<i64>,
    timings: Timings,
}

impl DistributedIntMean {
    /// Create a new instance with the default run configuration
    pub fn new() -> Self {
        Self::with_config(RunConfig::default())
    }

    pub fn with_config(config: RunConfig) -> Self {
        Self {
            config,
            state: ProtocolState::Uninitialized,
            params: None,
            parcel_count: 0,
            shares: Vec::new(),
            links: Vec::new(),
            agent: None,
            result: None,
            timings: Timings::default(),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Number of parcels shared in `setup`
    pub fn parcel_count(&self) -> usize {
        self.parcel_count
    }

    /// Phase durations measured so far
    pub fn timings(&self) -> Timings {
        self.timings
    }

    /// Broadcast agent created for the parties during `setup`.
    ///
    /// The mean protocol does not broadcast; the agent is available to
    /// protocols built on the same instance layout.
    pub fn broadcast_agent(&self) -> Option<&Arc<BroadcastAgent>> {
        self.agent.as_ref()
    }

    /// Validate inputs, share every parcel and spawn one task per party.
    ///
    /// Must be called from within a Tokio runtime. Nothing is spawned when
    /// validation fails.
    #[instrument(skip_all, fields(parties = params.party_count(), parcels = parcels.len()))]
    pub fn setup(&mut self, params: Arc<Parameters>, parcels: &[i64]) -> Result<()> {
        let start = Instant::now();
        self.expect_state(ProtocolState::Uninitialized)?;

        params.validate()?;
        if parcels.is_empty() {
            return Err(Error::InvalidInput(
                "at least one parcel is required to compute a mean".into(),
            ));
        }
        check_sum_bound(parcels, params.modulus())?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::InvalidConfig(format!("setup requires a Tokio runtime: {e}"))
        })?;

        let n = params.party_count();
        let shares = parcels
            .iter()
            .map(|&parcel| generate_shares(parcel, n, params.modulus()))
            .collect::<Result<Vec<_>>>()?;

        let links = (0..n)
            .map(|id| {
                let (shares_tx, shares_rx) = oneshot::channel();
                let (reply_tx, reply_rx) = oneshot::channel();
                let party = MeanParty::new(id, Arc::clone(&params), shares_rx, reply_tx);
                PartyLink {
                    id,
                    shares: shares_tx,
                    reply: reply_rx,
                    handle: runtime.spawn(party.run()),
                }
            })
            .collect();

        self.agent = Some(Arc::new(BroadcastAgent::new(n)));
        self.params = Some(params);
        self.parcel_count = parcels.len();
        self.shares = shares;
        self.links = links;
        self.state = ProtocolState::Configured;
        self.timings.setup = start.elapsed();

        info!(elapsed = ?self.timings.setup, "Protocol setup complete");
        Ok(())
    }

    /// Send each party its share column, wait for every reply, reconstruct
    /// the mean and wait for all party tasks to finish.
    #[instrument(skip_all, fields(parcels = self.parcel_count))]
    pub async fn run(&mut self) -> Result<()> {
        let start = Instant::now();
        self.expect_state(ProtocolState::Configured)?;

        let params = match &self.params {
            Some(params) => Arc::clone(params),
            None => {
                return Err(Error::InvalidState {
                    expected: "parameters",
                    actual: "none",
                })
            }
        };

        match self.exchange().await {
            Ok(result) => {
                self.result = Some(result);
                self.state = ProtocolState::Completed;
                self.timings.run = start.elapsed();
                info!(
                    parties = params.party_count(),
                    elapsed = ?self.timings.run,
                    "Mean reconstructed"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ProtocolState::Failed;
                self.timings.run = start.elapsed();
                warn!(error = %e, "Protocol run failed");
                Err(e)
            }
        }
    }

    /// Result of a completed run
    pub fn output(&self) -> Result<i64> {
        self.expect_state(ProtocolState::Completed)?;
        self.result.ok_or(Error::InvalidState {
            expected: "result",
            actual: "none",
        })
    }

    async fn exchange(&mut self) -> Result<i64> {
        let modulus = match &self.params {
            Some(params) => params.modulus().clone(),
            None => {
                return Err(Error::InvalidState {
                    expected: "parameters",
                    actual: "none",
                })
            }
        };
        let links = std::mem::take(&mut self.links);
        let columns = transpose(std::mem::take(&mut self.shares), links.len());

        let mut replies = Vec::with_capacity(links.len());
        let mut handles = Vec::with_capacity(links.len());
        for (link, column) in links.into_iter().zip(columns) {
            if link.shares.send(column).is_err() {
                debug!(party_id = link.id, "Party stopped before receiving shares");
            }
            replies.push((link.id, link.reply));
            handles.push((link.id, link.handle));
        }
        debug!(parties = handles.len(), "Distributed share vectors");

        let timeout = self.config.reply_timeout;
        let pending = replies.into_iter().map(|(party, reply)| async move {
            match time::timeout(timeout, reply).await {
                Ok(Ok(partial)) => Ok(partial),
                Ok(Err(_)) => Err(Error::PartyFailed {
                    party,
                    reason: "reply channel closed".into(),
                }),
                Err(_) => Err(Error::Timeout {
                    party,
                    after: timeout,
                }),
            }
        });

        let partials = match try_join_all(pending).await {
            Ok(partials) => partials,
            Err(e) => return Err(abort_parties(e, handles).await),
        };
        debug!(replies = partials.len(), "Collected partial results");

        let mean = reconstruct_mean(&partials, self.parcel_count, &modulus);
        join_parties(handles).await?;
        mean
    }

    fn expect_state(&self, expected: ProtocolState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }
}

impl Default for DistributedIntMean {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntProtocol for DistributedIntMean {
    fn setup(&mut self, params: Arc<Parameters>, parcels: &[i64]) -> Result<()> {
        DistributedIntMean::setup(self, params, parcels)
    }

    async fn run(&mut self) -> Result<()> {
        DistributedIntMean::run(self).await
    }

    fn output(&self) -> Result<i64> {
        DistributedIntMean::output(self)
    }
}

/// Turn the parcel-major share matrix into one share vector per party,
/// moving every share exactly once
fn transpose(rows: Vec<Vec<Share>>, parties: usize) -> Vec<Vec<Share>> {
    let mut columns: Vec<Vec<Share>> = (0..parties)
        .map(|_| Vec::with_capacity(rows.len()))
        .collect();
    for row in rows {
        for (column, share) in columns.iter_mut().zip(row) {
            column.push(share);
        }
    }
    columns
}

/// Reject parcels whose sum falls outside `(-M/2, M/2)`, where the
/// centered lift in `reconstruct_mean` would no longer be exact
fn check_sum_bound(parcels: &[i64], modulus: &BigUint) -> Result<()> {
    let sum: BigInt = parcels.iter().map(|&p| BigInt::from(p)).sum();
    if sum.magnitude() * 2u32 >= *modulus {
        return Err(Error::InvalidInput(format!(
            "parcel sum does not fit the {}-bit modulus",
            modulus.bits()
        )));
    }
    Ok(())
}

/// Wait for every party task to terminate, reporting the first failure
async fn join_parties(handles: Vec<(PartyId, JoinHandle<Result<()>>)>) -> Result<()> {
    let mut first_error = None;
    for (party, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::PartyFailed {
                party,
                reason: e.to_string(),
            }),
        };
        if let Err(e) = outcome {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Stop every party task after a failed exchange and refine the error with
/// the failing party's own report when one is available
async fn abort_parties(error: Error, handles: Vec<(PartyId, JoinHandle<Result<()>>)>) -> Error {
    let failed = match &error {
        Error::PartyFailed { party, .. } => Some(*party),
        _ => None,
    };

    let mut refined = None;
    for (party, handle) in handles {
        if Some(party) == failed {
            refined = match time::timeout(FAILURE_REPORT_TIMEOUT, handle).await {
                Ok(Ok(Err(e))) => Some(Error::PartyFailed {
                    party,
                    reason: e.to_string(),
                }),
                Ok(Err(e)) => Some(Error::PartyFailed {
                    party,
                    reason: e.to_string(),
                }),
                _ => None,
            };
        } else {
            handle.abort();
        }
    }

    refined.unwrap_or(error)
}

/// Recombine the parties' partial results into `floor(sum / parcel_count)`.
///
/// Each party holds `S_i = k * q_i + r_i`, so `k * sum(q) + sum(r)` is the
/// parcel sum modulo M. The sum is lifted to its centered representative
/// before dividing, which keeps negative means exact as long as the true
/// parcel sum lies in `(-M/2, M/2]`.
pub fn reconstruct_mean(
    partials: &[PartialResult],
    parcel_count: usize,
    modulus: &BigUint,
) -> Result<i64> {
    if parcel_count == 0 {
        return Err(Error::Arithmetic("division by zero parcel count".into()));
    }
    if modulus.is_zero() {
        return Err(Error::Arithmetic("modulus must be positive".into()));
    }

    let k = BigUint::from(parcel_count);
    let quotients = mod_sum(partials.iter().map(|p| &p.quotient), modulus);
    let remainders = mod_sum(partials.iter().map(|p| &p.remainder), modulus);
    let total = (quotients * &k + remainders) % modulus;

    to_signed(&total, modulus)
        .div_floor(&BigInt::from(parcel_count))
        .to_i64()
        .ok_or_else(|| Error::Arithmetic("mean does not fit in i64".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::div_rem;

    fn partials_for(sums: &[u64], k: usize, modulus: &BigUint) -> Vec<PartialResult> {
        sums.iter()
            .enumerate()
            .map(|(id, &s)| {
                let (quotient, remainder) = div_rem(&(BigUint::from(s) % modulus), k).unwrap();
                PartialResult {
                    party_id: id,
                    quotient,
                    remainder,
                }
            })
            .collect()
    }

    #[test]
    fn test_transpose_moves_columns() {
        let rows = vec![
            vec![BigUint::from(1u32), BigUint::from(2u32)],
            vec![BigUint::from(3u32), BigUint::from(4u32)],
            vec![BigUint::from(5u32), BigUint::from(6u32)],
        ];
        let columns = transpose(rows, 2);
        assert_eq!(columns[0], [1u32, 3, 5].map(BigUint::from).to_vec());
        assert_eq!(columns[1], [2u32, 4, 6].map(BigUint::from).to_vec());
    }

    #[test]
    fn test_reconstruct_mean_wraps() {
        // Shares of 1 and 3 modulo 101: (60, 42) and (80, 24)
        let modulus = BigUint::from(101u32);
        let partials = partials_for(&[60 + 80, 42 + 24], 2, &modulus);
        assert_eq!(reconstruct_mean(&partials, 2, &modulus).unwrap(), 2);
    }

    #[test]
    fn test_reconstruct_mean_negative() {
        // Parcels -7 and 2 modulo 101: sum -5 = 96
        let modulus = BigUint::from(101u32);
        let partials = partials_for(&[50, 46], 2, &modulus);
        assert_eq!(reconstruct_mean(&partials, 2, &modulus).unwrap(), -3);
    }

    #[test]
    fn test_reconstruct_mean_rejects_zero_count() {
        let modulus = BigUint::from(101u32);
        assert!(matches!(
            reconstruct_mean(&[], 0, &modulus),
            Err(Error::Arithmetic(_))
        ));
    }

    #[test]
    fn test_new_instance_state() {
        let protocol = DistributedIntMean::new();
        assert_eq!(protocol.state(), ProtocolState::Uninitialized);
        assert!(protocol.broadcast_agent().is_none());
        assert!(matches!(
            protocol.output(),
            Err(Error::InvalidState {
                expected: "completed",
                actual: "uninitialized"
            })
        ));
    }

    fn configured_with(
        links: Vec<PartyLink>,
        reply_timeout: Duration,
    ) -> DistributedIntMean {
        let params = Parameters::new(
            links.len(),
            BigUint::from(101u32),
            Default::default(),
            0,
        );
        let config = RunConfig::new(reply_timeout).unwrap();
        let mut protocol = DistributedIntMean::with_config(config);
        protocol.shares = vec![vec![BigUint::from(1u32); links.len()]];
        protocol.links = links;
        protocol.params = Some(Arc::new(params));
        protocol.parcel_count = 1;
        protocol.state = ProtocolState::Configured;
        protocol
    }

    fn echo_link(id: PartyId) -> PartyLink {
        let (shares, shares_rx) = oneshot::channel();
        let (reply_tx, reply) = oneshot::channel();
        let party = MeanParty::new(
            id,
            Arc::new(Parameters::new(2, BigUint::from(101u32), Default::default(), 0)),
            shares_rx,
            reply_tx,
        );
        PartyLink {
            id,
            shares,
            reply,
            handle: tokio::spawn(party.run()),
        }
    }

    #[tokio::test]
    async fn test_run_times_out_on_stalled_party() {
        let (shares, shares_rx) = oneshot::channel::<Vec<Share>>();
        let (reply_tx, reply) = oneshot::channel::<PartialResult>();
        let stalled = tokio::spawn(async move {
            let _reply = reply_tx;
            let _ = shares_rx.await;
            std::future::pending::<()>().await;
            Ok::<(), Error>(())
        });
        let links = vec![
            echo_link(0),
            PartyLink {
                id: 1,
                shares,
                reply,
                handle: stalled,
            },
        ];

        let mut protocol = configured_with(links, Duration::from_millis(50));
        let err = protocol.run().await.unwrap_err();

        assert!(matches!(err, Error::Timeout { party: 1, .. }));
        assert_eq!(protocol.state(), ProtocolState::Failed);
        assert!(protocol.output().is_err());
    }

    #[tokio::test]
    async fn test_run_reports_party_failure() {
        let (shares, shares_rx) = oneshot::channel::<Vec<Share>>();
        let (reply_tx, reply) = oneshot::channel::<PartialResult>();
        let failing = tokio::spawn(async move {
            let _ = shares_rx.await;
            drop(reply_tx);
            Err::<(), Error>(Error::Arithmetic("division by zero".into()))
        });
        let links = vec![
            PartyLink {
                id: 0,
                shares,
                reply,
                handle: failing,
            },
            echo_link(1),
        ];

        let mut protocol = configured_with(links, Duration::from_secs(5));
        let err = protocol.run().await.unwrap_err();

        match err {
            Error::PartyFailed { party, reason } => {
                assert_eq!(party, 0);
                assert!(reason.contains("division by zero"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(protocol.state(), ProtocolState::Failed);
    }

    #[tokio::test]
    async fn test_dropped_instance_stops_parties() {
        let params = Arc::new(Parameters::generate(64, 3).unwrap());
        let mut protocol = DistributedIntMean::new();
        protocol.setup(params, &[1, 2, 3]).unwrap();

        let handles: Vec<_> = protocol
            .links
            .iter_mut()
            .map(|link| {
                let placeholder = tokio::spawn(async { Ok::<(), Error>(()) });
                std::mem::replace(&mut link.handle, placeholder)
            })
            .collect();
        drop(protocol);

        for handle in handles {
            let outcome = time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("party task still running")
                .unwrap();
            assert!(matches!(outcome, Err(Error::PartyFailed { .. })));
        }
    }

    #[tokio::test]
    async fn test_failed_reconstruction_still_joins_parties() {
        let (shares, shares_rx) = oneshot::channel::<Vec<Share>>();
        let (reply_tx, reply) = oneshot::channel::<PartialResult>();
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let slow = tokio::spawn(async move {
            let _ = shares_rx.await;
            let _ = reply_tx.send(PartialResult {
                party_id: 1,
                quotient: BigUint::zero(),
                remainder: BigUint::zero(),
            });
            time::sleep(Duration::from_millis(50)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<(), Error>(())
        });
        let links = vec![
            echo_link(0),
            PartyLink {
                id: 1,
                shares,
                reply,
                handle: slow,
            },
        ];

        let mut protocol = configured_with(links, Duration::from_secs(5));
        protocol.parcel_count = 0;
        let err = protocol.run().await.unwrap_err();

        assert!(matches!(err, Error::Arithmetic(_)));
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(protocol.state(), ProtocolState::Failed);
    }

    #[test]
    fn test_sum_bound() {
        let modulus = BigUint::from(101u32);
        assert!(check_sum_bound(&[25, 25], &modulus).is_ok());
        assert!(check_sum_bound(&[-50], &modulus).is_ok());
        assert!(matches!(
            check_sum_bound(&[26, 25], &modulus),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            check_sum_bound(&[-51], &modulus),
            Err(Error::InvalidInput(_))
        ));
    }
}
