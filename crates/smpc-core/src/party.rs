//! Computing parties
//!
//! A party is a single-use task: it waits for its share vector, computes a
//! local partial result and replies once. It never sees another party's
//! shares.

use crate::arith::{div_rem, mod_sum};
use crate::{Error, Parameters, PartialResult, PartyId, Result, Share};
use async_trait::async_trait;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// A protocol party running as its own task
#[async_trait]
pub trait Party: Send + 'static {
    /// Party id within the protocol instance
    fn id(&self) -> PartyId;

    /// Execute the party's role until it has replied or failed
    async fn run(self) -> Result<()>;
}

/// Party of the distributed integer mean protocol
pub struct MeanParty {
    id: PartyId,
    params: Arc<Parameters>,
    inbox: oneshot::Receiver<Vec<Share>>,
    outbox: oneshot::Sender<PartialResult>,
}

impl MeanParty {
    /// Create a party bound to its orchestrator link
    pub fn new(
        id: PartyId,
        params: Arc<Parameters>,
        inbox: oneshot::Receiver<Vec<Share>>,
        outbox: oneshot::Sender<PartialResult>,
    ) -> Self {
        Self {
            id,
            params,
            inbox,
            outbox,
        }
    }
}

/// Sum `shares` mod `modulus` and divide by the number of shares
pub fn compute_partial(id: PartyId, shares: &[Share], modulus: &BigUint) -> Result<PartialResult> {
    let sum = mod_sum(shares, modulus);
    let (quotient, remainder) = div_rem(&sum, shares.len())?;

    Ok(PartialResult {
        party_id: id,
        quotient: quotient % modulus,
        remainder: remainder % modulus,
    })
}

#[async_trait]
impl Party for MeanParty {
    fn id(&self) -> PartyId {
        self.id
    }

    async fn run(self) -> Result<()> {
        let id = self.id;

        let shares = self.inbox.await.map_err(|_| {
            debug!(party_id = id, "Share channel closed before delivery");
            Error::PartyFailed {
                party: id,
                reason: "share channel closed".into(),
            }
        })?;
        debug!(party_id = id, shares = shares.len(), "Received share vector");

        let partial = compute_partial(id, &shares, self.params.modulus()).map_err(|e| {
            error!(party_id = id, error = %e, "Partial computation failed");
            e
        })?;

        self.outbox.send(partial).map_err(|_| Error::PartyFailed {
            party: id,
            reason: "reply channel closed".into(),
        })?;

        debug!(party_id = id, "Replied to orchestrator");
        Ok(())
    }
}
