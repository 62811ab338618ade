//! corral-core — shared domain types for the corral runner fleet manager.
//!
//! Defines the entities the rest of the workspace operates on: scaling
//! pools, runner instances with their two independent status axes,
//! the controller identity, cached CI jobs, and the TOML configuration
//! for the daemon and its providers.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CorralConfig, ExternalConfig, ProviderConfig};
pub use error::ValidationError;
pub use types::*;
