//! corral-state — embedded persistence for the corral engine.
//!
//! A redb-backed store holding entities, pools, instance records, the
//! job cache, and the controller identity singleton. Single-record
//! writes are transactional; cross-record invariants (like a pool's
//! `max_runners` cap) are enforced by the reconciler, not here.

mod error;
mod store;
mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
