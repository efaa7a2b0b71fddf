//! Secret-sharing protocols over integers

use crate::{Parameters, Result};
use async_trait::async_trait;
use std::sync::Arc;

mod mean;

pub use mean::{reconstruct_mean, DistributedIntMean};

/// Lifecycle of a protocol instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Created, `setup` not called yet
    Uninitialized,
    /// Shares generated and parties spawned
    Configured,
    /// `run` succeeded, output available
    Completed,
    /// `run` failed; the instance cannot be reused
    Failed,
}

impl ProtocolState {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolState::Uninitialized => "uninitialized",
            ProtocolState::Configured => "configured",
            ProtocolState::Completed => "completed",
            ProtocolState::Failed => "failed",
        }
    }
}

/// A secret-sharing protocol computing an integer from client parcels
#[async_trait]
pub trait IntProtocol: Send {
    /// Validate parameters, share the parcels and spawn the parties
    fn setup(&mut self, params: Arc<Parameters>, parcels: &[i64]) -> Result<()>;

    /// Distribute shares, collect partial results and reconstruct
    async fn run(&mut self) -> Result<()>;

    /// Result of a completed run
    fn output(&self) -> Result<i64>;
}
