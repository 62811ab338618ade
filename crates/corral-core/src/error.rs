//! Validation errors for pools and entities.

use thiserror::Error;

/// Errors raised while validating operator-supplied pool or entity
/// parameters. These are rejected before any provider call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_runners must be greater than zero")]
    MaxRunnersZero,

    #[error("min_idle_runners ({min}) exceeds max_runners ({max})")]
    MinIdleExceedsMax { min: u32, max: u32 },

    #[error("pool has no provider_name")]
    MissingProvider,

    #[error("pool has no tags; runners would never match a job")]
    MissingTags,

    #[error("pool has no image")]
    MissingImage,

    #[error("pool has no flavor")]
    MissingFlavor,

    #[error("entity has no owner/name")]
    MissingEntityName,

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
