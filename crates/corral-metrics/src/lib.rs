//! corral-metrics — observability for the fleet engine.
//!
//! Lock-free counters for instance and provider operations, per-pool
//! gauges snapshotted by the reconciler, and Prometheus-compatible
//! text exposition.

mod prometheus;
mod registry;

pub use prometheus::render_prometheus;
pub use registry::{Metrics, PoolSnapshot};
