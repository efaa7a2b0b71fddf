//! Core types shared by the protocol modules

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use msg_broadcast::PartyId;

/// A single additive share, an element of `[0, M)`
pub type Share = BigUint;

/// Payload parties exchange through the broadcast agent
pub type BroadcastMessage = msg_broadcast::Envelope<Vec<BigUint>>;

/// Broadcast agent specialised to big-integer payloads
pub type BroadcastAgent = msg_broadcast::BroadcastAgent<Vec<BigUint>>;

/// A party's local contribution to the mean: its share sum divided by the
/// number of parcels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Replying party
    pub party_id: PartyId,
    /// Quotient of the share sum by the parcel count, reduced mod M
    pub quotient: BigUint,
    /// Remainder of the share sum by the parcel count
    pub remainder: BigUint,
}

/// Wall-clock duration of the protocol phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// Time spent in `setup`
    pub setup: Duration,
    /// Time spent in `run`
    pub run: Duration,
}
