//! Error types for secret-sharing protocol operations

use crate::PartyId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running a protocol
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid protocol configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid client input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lifecycle method called out of order
    #[error("Invalid protocol state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Arithmetic precondition violated
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// Party did not reply in time
    #[error("Timeout waiting for party {party} after {after:?}")]
    Timeout { party: PartyId, after: Duration },

    /// Party task terminated without a valid reply
    #[error("Party {party} failed: {reason}")]
    PartyFailed { party: PartyId, reason: String },

    /// Broadcast agent error
    #[error(transparent)]
    Broadcast(#[from] msg_broadcast::BroadcastError),
}
