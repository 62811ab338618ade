//! corral-sweep — the consistency sweep.
//!
//! The reconciler converges on what the store says; the sweep converges
//! the store and the provider on each other. Compute the provider holds
//! but the store never heard of gets deleted; records the store holds
//! for compute the provider lost get parked in `error` for cleanup.
//! The sweep never invents success: a failed provider listing means no
//! action for that pool.

mod error;
mod sweeper;

pub use error::{SweepError, SweepResult};
pub use sweeper::{SweepConfig, Sweeper};
