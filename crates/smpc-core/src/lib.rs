//! # SMPC Core
//!
//! Secure multi-party computation of an integer mean over additively
//! secret-shared inputs, in the commodity-based semi-honest model.
//!
//! This crate provides:
//! - Cryptographically secure sampling and modular arithmetic helpers
//! - Additive secret sharing and Beaver triplet generation
//! - Protocol parameters, including a dealer that generates them
//! - The distributed integer mean protocol and its parties
//!
//! ## Protocol Overview
//!
//! A trusted dealer fixes a prime modulus M and a Beaver triplet before the
//! protocol starts. The client's parcels are split into additive shares, one
//! per computing party. Each party only sees its own shares: it sums them,
//! divides by the parcel count and returns the quotient and remainder. The
//! orchestrator recombines those partial results into the floor of the mean.
//!
//! ## Example
//!
//! ```rust,no_run
//! use smpc_core::{DistributedIntMean, Parameters};
//! use std::sync::Arc;
//!
//! # async fn example() -> smpc_core::Result<()> {
//! let params = Arc::new(Parameters::generate(128, 3)?);
//!
//! let mut protocol = DistributedIntMean::new();
//! protocol.setup(params, &[1, 3])?;
//! protocol.run().await?;
//! assert_eq!(protocol.output()?, 2);
//! # Ok(())
//! # }
//! ```

pub mod arith;
pub mod config;
pub mod error;
pub mod params;
pub mod party;
pub mod protocol;
pub mod sharing;
pub mod types;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use params::{BeaverTriplet, Parameters};
pub use party::{MeanParty, Party};
pub use protocol::{DistributedIntMean, IntProtocol, ProtocolState};
pub use sharing::{generate_beaver_triplet, generate_shares};
pub use types::{BroadcastAgent, BroadcastMessage, PartialResult, PartyId, Share, Timings};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of computing parties
pub const DEFAULT_PARTIES: usize = 2;

/// Default modulus size in bits
pub const DEFAULT_MODULUS_BITS: u64 = 128;
