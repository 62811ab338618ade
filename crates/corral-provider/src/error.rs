//! Provider error taxonomy.
//!
//! The split between transient and permanent failures drives the
//! reconciler's retry policy: transient errors are retried with bounded
//! backoff and never surfaced past one pass, permanent errors move the
//! instance to `error` immediately.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a provider call can produce.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network/timeout class failure; safe to retry with the same
    /// idempotency key.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Explicit rejection (quota, auth, bad request); retrying will not
    /// help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),

    /// The instance does not exist at the provider.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// The provider reported a lifecycle state outside the set it is
    /// allowed to set.
    #[error("provider reported invalid status: {0}")]
    InvalidStatus(String),

    /// Provider configuration is unusable.
    #[error(transparent)]
    Config(#[from] corral_core::config::ConfigError),

    /// The binary produced output the adapter could not decode.
    #[error("failed to decode provider response: {0}")]
    Payload(#[from] serde_json::Error),

    /// No provider is configured under the requested name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// True when the reconciler may retry the call with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}
