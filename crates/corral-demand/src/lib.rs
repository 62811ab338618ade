//! corral-demand — turns CI job events into demand on the engine.
//!
//! Jobs are an external, at-least-once signal. The demand signal owns
//! the runner-status axis of every instance: queued jobs wake the pool
//! that matches their labels, in-progress jobs mark a runner busy,
//! completed jobs terminate the runner and queue its instance for
//! deletion so the reconciler can provision fresh capacity.

mod error;
mod signal;

pub use error::{DemandError, DemandResult};
pub use signal::DemandSignal;
