//! Operation counters and pool gauges.
//!
//! Counters use atomics and are shared via `Arc<Metrics>` across the
//! reconciler, sweeper, and demand signal. Pool gauges are computed by
//! whoever holds the pool's instances and handed to the renderer as
//! snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use corral_core::{Instance, InstanceStatus, Pool};

/// Point-in-time view of one pool, for gauge exposition.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub enabled: bool,
    pub min_idle_runners: u32,
    pub max_runners: u32,
    /// Non-terminal instances.
    pub current: u32,
    /// Instances in `running`/`idle`.
    pub idle: u32,
    /// Instances in `error`.
    pub errored: u32,
}

impl PoolSnapshot {
    pub fn compute(pool: &Pool, instances: &[Instance]) -> Self {
        let current = instances
            .iter()
            .filter(|i| i.status.counts_toward_cap())
            .count() as u32;
        let idle = instances.iter().filter(|i| i.is_idle()).count() as u32;
        let errored = instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Error)
            .count() as u32;
        Self {
            pool_id: pool.id.clone(),
            enabled: pool.enabled,
            min_idle_runners: pool.min_idle_runners,
            max_runners: pool.max_runners,
            current,
            idle,
            errored,
        }
    }
}

/// Process-wide operation counters.
#[derive(Debug, Default)]
pub struct Metrics {
    pub instance_create_attempts: AtomicU64,
    pub instance_create_failures: AtomicU64,
    pub instance_delete_attempts: AtomicU64,
    pub instance_delete_failures: AtomicU64,
    pub provider_op_attempts: AtomicU64,
    pub provider_op_failures: AtomicU64,
    pub jobs_received: AtomicU64,
    pub jobs_deduplicated: AtomicU64,
    pub sweep_orphans_removed: AtomicU64,
    pub sweep_lost_instances: AtomicU64,
    pub force_deletes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::*;

    fn test_pool() -> Pool {
        Pool {
            id: "pool-1".to_string(),
            entity_id: "entity-1".to_string(),
            provider_name: "fake".to_string(),
            image: "ubuntu-22.04".to_string(),
            flavor: "m1.small".to_string(),
            min_idle_runners: 2,
            max_runners: 10,
            tags: vec!["self-hosted".to_string()],
            enabled: true,
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            runner_prefix: DEFAULT_RUNNER_PREFIX.to_string(),
            bootstrap_timeout_secs: 1200,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn instance(status: InstanceStatus, runner_status: RunnerStatus) -> Instance {
        Instance {
            name: format!("corral-{status}"),
            pool_id: "pool-1".to_string(),
            provider_id: None,
            status,
            runner_status,
            provider_fault: None,
            attempt: 0,
            force_delete: false,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn snapshot_counts_by_axis() {
        let pool = test_pool();
        let instances = vec![
            instance(InstanceStatus::Running, RunnerStatus::Idle),
            instance(InstanceStatus::Running, RunnerStatus::Active),
            instance(InstanceStatus::Creating, RunnerStatus::Pending),
            instance(InstanceStatus::Error, RunnerStatus::Pending),
        ];

        let snap = PoolSnapshot::compute(&pool, &instances);
        assert_eq!(snap.current, 4);
        assert_eq!(snap.idle, 1);
        assert_eq!(snap.errored, 1);
        assert_eq!(snap.min_idle_runners, 2);
        assert_eq!(snap.max_runners, 10);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        Metrics::inc(&metrics.instance_create_attempts);
        Metrics::inc(&metrics.instance_create_attempts);
        Metrics::inc(&metrics.instance_create_failures);

        assert_eq!(Metrics::get(&metrics.instance_create_attempts), 2);
        assert_eq!(Metrics::get(&metrics.instance_create_failures), 1);
        assert_eq!(Metrics::get(&metrics.jobs_received), 0);
    }
}
