//! Message Broadcast Library
//!
//! Provides a round-based broadcast agent for n-party MPC protocols. Every
//! party subscribes a delivery channel, then broadcasts exactly one message
//! per round. Once all parties have broadcast for a round, the complete
//! batch (ordered by sender) is delivered to every subscriber.
//!
//! The agent is an in-process primitive: it models an ideal, lossless and
//! ordered channel between parties. Network transport is layered elsewhere.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Party identifier within a protocol instance
pub type PartyId = usize;

/// Protocol round number
pub type Round = u32;

/// Broadcast error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Unknown party {party}: agent serves {n_parties} parties")]
    UnknownParty { party: PartyId, n_parties: usize },
    #[error("Party {party} already broadcast in round {round}")]
    DuplicateMessage { party: PartyId, round: Round },
    #[error("Round {0} already delivered")]
    RoundClosed(Round),
    #[error("Party {0} must subscribe before broadcasting")]
    NotSubscribed(PartyId),
    #[error("Delivery of round {round} failed for parties {parties:?}")]
    Delivery { round: Round, parties: Vec<PartyId> },
}

pub type Result<T> = std::result::Result<T, BroadcastError>;

/// A message broadcast by one party in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Sender party ID
    pub from: PartyId,
    /// Round the message belongs to
    pub round: Round,
    /// Message payload
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Create a new envelope
    pub fn new(from: PartyId, round: Round, payload: T) -> Self {
        Self {
            from,
            round,
            payload,
        }
    }
}

/// All messages of a completed round, ordered by sender
pub type Batch<T> = Vec<Envelope<T>>;

/// Sending half handed to the agent on subscription
pub type BatchSender<T> = mpsc::UnboundedSender<Batch<T>>;

/// Receiving half kept by a subscribed party
pub type BatchReceiver<T> = mpsc::UnboundedReceiver<Batch<T>>;

#[derive(Debug)]
struct RoundBuffer<T> {
    messages: Vec<Envelope<T>>,
    closed: bool,
}

impl<T> Default for RoundBuffer<T> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            closed: false,
        }
    }
}

/// Round-based broadcast agent shared by all parties of a protocol instance
#[derive(Debug)]
pub struct BroadcastAgent<T> {
    n_parties: usize,
    /// Party registry, empty until parties subscribe
    parties: DashMap<PartyId, BatchSender<T>>,
    rounds: DashMap<Round, RoundBuffer<T>>,
}

impl<T: Clone> BroadcastAgent<T> {
    /// Create an agent for `n_parties` parties with ids `0..n_parties`
    pub fn new(n_parties: usize) -> Self {
        Self {
            n_parties,
            parties: DashMap::new(),
            rounds: DashMap::new(),
        }
    }

    /// Number of parties a round waits for
    pub fn n_parties(&self) -> usize {
        self.n_parties
    }

    /// Number of currently subscribed parties
    pub fn subscribed(&self) -> usize {
        self.parties.len()
    }

    /// Number of messages buffered for a round that is not yet delivered
    pub fn pending(&self, round: Round) -> usize {
        self.rounds
            .get(&round)
            .map(|buffer| if buffer.closed { 0 } else { buffer.messages.len() })
            .unwrap_or(0)
    }

    /// Register `party`'s inbound channel for future deliveries.
    ///
    /// Subscribing again replaces the previously registered channel.
    pub fn subscribe(&self, party: PartyId, channel: BatchSender<T>) -> Result<()> {
        self.check_party(party)?;
        if self.parties.insert(party, channel).is_some() {
            debug!(party, "Replaced broadcast subscription");
        } else {
            debug!(party, "Party subscribed");
        }
        Ok(())
    }

    /// Create a channel, subscribe its sending half and return the receiver
    pub fn subscribe_channel(&self, party: PartyId) -> Result<BatchReceiver<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(party, tx)?;
        Ok(rx)
    }

    /// Remove `party` from the registry
    pub fn unsubscribe(&self, party: PartyId) -> bool {
        self.parties.remove(&party).is_some()
    }

    /// Buffer `message` for `round`.
    ///
    /// When the last party's message for the round arrives the full batch is
    /// delivered to every subscriber and the round is closed.
    pub fn broadcast(&self, round: Round, message: Envelope<T>) -> Result<()> {
        let from = message.from;
        self.check_party(from)?;
        if !self.parties.contains_key(&from) {
            return Err(BroadcastError::NotSubscribed(from));
        }

        let batch = {
            let mut buffer = self.rounds.entry(round).or_default();
            if buffer.closed {
                return Err(BroadcastError::RoundClosed(round));
            }
            if buffer.messages.iter().any(|m| m.from == from) {
                return Err(BroadcastError::DuplicateMessage { party: from, round });
            }

            buffer.messages.push(Envelope { round, ..message });
            debug!(
                round,
                from,
                received = buffer.messages.len(),
                expected = self.n_parties,
                "Buffered broadcast"
            );

            if buffer.messages.len() < self.n_parties {
                return Ok(());
            }

            buffer.closed = true;
            let mut batch = std::mem::take(&mut buffer.messages);
            batch.sort_by_key(|m| m.from);
            batch
        };

        self.deliver(round, batch)
    }

    fn deliver(&self, round: Round, batch: Batch<T>) -> Result<()> {
        let mut failed = Vec::new();
        for entry in self.parties.iter() {
            if entry.value().send(batch.clone()).is_err() {
                warn!(round, party = *entry.key(), "Subscriber dropped its receiver");
                failed.push(*entry.key());
            }
        }

        debug!(round, messages = batch.len(), "Delivered round");

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort_unstable();
            Err(BroadcastError::Delivery {
                round,
                parties: failed,
            })
        }
    }

    fn check_party(&self, party: PartyId) -> Result<()> {
        if party >= self.n_parties {
            return Err(BroadcastError::UnknownParty {
                party,
                n_parties: self.n_parties,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribed_agent(n: usize) -> (BroadcastAgent<u32>, Vec<BatchReceiver<u32>>) {
        let agent = BroadcastAgent::new(n);
        let receivers = (0..n)
            .map(|id| agent.subscribe_channel(id).unwrap())
            .collect();
        (agent, receivers)
    }

    #[test]
    fn test_new_agent_has_empty_registry() {
        let agent = BroadcastAgent::<u32>::new(3);
        assert_eq!(agent.n_parties(), 3);
        assert_eq!(agent.subscribed(), 0);
        assert_eq!(agent.pending(1), 0);
    }

    #[tokio::test]
    async fn test_round_delivered_once_complete() {
        let (agent, mut receivers) = subscribed_agent(3);

        agent.broadcast(1, Envelope::new(2, 1, 30)).unwrap();
        agent.broadcast(1, Envelope::new(0, 1, 10)).unwrap();
        assert_eq!(agent.pending(1), 2);
        assert!(receivers[0].try_recv().is_err());

        agent.broadcast(1, Envelope::new(1, 1, 20)).unwrap();
        assert_eq!(agent.pending(1), 0);

        for rx in receivers.iter_mut() {
            let batch = rx.recv().await.unwrap();
            let senders: Vec<_> = batch.iter().map(|m| m.from).collect();
            let payloads: Vec<_> = batch.iter().map(|m| m.payload).collect();
            assert_eq!(senders, vec![0, 1, 2]);
            assert_eq!(payloads, vec![10, 20, 30]);
        }
    }

    #[test]
    fn test_rounds_are_independent() {
        let (agent, mut receivers) = subscribed_agent(2);

        agent.broadcast(1, Envelope::new(0, 1, 1)).unwrap();
        agent.broadcast(2, Envelope::new(0, 2, 2)).unwrap();
        agent.broadcast(2, Envelope::new(1, 2, 3)).unwrap();

        let batch = receivers[1].try_recv().unwrap();
        assert!(batch.iter().all(|m| m.round == 2));
        assert_eq!(agent.pending(1), 1);
    }

    #[test]
    fn test_round_field_follows_broadcast_round() {
        let (agent, mut receivers) = subscribed_agent(2);

        agent.broadcast(4, Envelope::new(0, 0, 1)).unwrap();
        agent.broadcast(4, Envelope::new(1, 9, 2)).unwrap();

        let batch = receivers[0].try_recv().unwrap();
        assert!(batch.iter().all(|m| m.round == 4));
    }

    #[test]
    fn test_rejects_unknown_party() {
        let agent = BroadcastAgent::<u32>::new(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(
            agent.subscribe(2, tx),
            Err(BroadcastError::UnknownParty {
                party: 2,
                n_parties: 2
            })
        );
        assert!(matches!(
            agent.broadcast(0, Envelope::new(5, 0, 1)),
            Err(BroadcastError::UnknownParty { party: 5, .. })
        ));
    }

    #[test]
    fn test_requires_subscription() {
        let agent = BroadcastAgent::<u32>::new(2);
        assert_eq!(
            agent.broadcast(0, Envelope::new(1, 0, 1)),
            Err(BroadcastError::NotSubscribed(1))
        );
    }

    #[test]
    fn test_rejects_duplicate_and_closed_round() {
        let (agent, _receivers) = subscribed_agent(2);

        agent.broadcast(0, Envelope::new(0, 0, 1)).unwrap();
        assert_eq!(
            agent.broadcast(0, Envelope::new(0, 0, 1)),
            Err(BroadcastError::DuplicateMessage { party: 0, round: 0 })
        );

        agent.broadcast(0, Envelope::new(1, 0, 1)).unwrap();
        assert_eq!(
            agent.broadcast(0, Envelope::new(1, 0, 1)),
            Err(BroadcastError::RoundClosed(0))
        );
    }

    #[test]
    fn test_reports_dropped_subscriber() {
        let (agent, mut receivers) = subscribed_agent(2);
        drop(receivers.remove(1));

        agent.broadcast(0, Envelope::new(0, 0, 1)).unwrap();
        assert_eq!(
            agent.broadcast(0, Envelope::new(1, 0, 1)),
            Err(BroadcastError::Delivery {
                round: 0,
                parties: vec![1]
            })
        );
        assert_eq!(receivers[0].try_recv().unwrap().len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let (agent, _receivers) = subscribed_agent(2);
        assert!(agent.unsubscribe(0));
        assert!(!agent.unsubscribe(0));
        assert_eq!(agent.subscribed(), 1);
    }
}
