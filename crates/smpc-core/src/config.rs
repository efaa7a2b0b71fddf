//! Run-time configuration for protocol execution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on how long `run` waits for a party's reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs for a protocol run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum time to wait for each party's reply
    pub reply_timeout: Duration,
}

impl RunConfig {
    /// Create a new run configuration
    pub fn new(reply_timeout: Duration) -> Result<Self> {
        if reply_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "reply timeout must be greater than zero".into(),
            ));
        }
        Ok(Self { reply_timeout })
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}
