//! The reconciler drives every pool toward its declared shape.
//!
//! Each pass takes a snapshot of a pool's instances, computes the deficit
//! or surplus against `min_idle_runners` / `max_runners`, and issues
//! provider calls to close the gap. Passes for the same pool are
//! serialized behind a per-pool lock; wake-ups that arrive mid-pass are
//! coalesced into a single follow-up run.

pub mod error;
pub mod lifecycle;
pub mod reconciler;
mod wake;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use wake::WakeHandle;
