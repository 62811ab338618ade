//! The periodic sweep pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use corral_core::types::epoch_secs;
use corral_core::{ControllerInfo, InstanceStatus, JobStatus, Pool};
use corral_metrics::Metrics;
use corral_provider::{ProviderError, Registry};
use corral_reconciler::lifecycle;
use corral_state::StateStore;

use crate::error::SweepResult;

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Completed jobs older than this are dropped from the cache.
    pub job_retention: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            job_retention: Duration::from_secs(600),
        }
    }
}

/// Cross-checks provider reality against stored records, pool by pool.
pub struct Sweeper {
    store: StateStore,
    registry: Registry,
    controller: ControllerInfo,
    metrics: Arc<Metrics>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(
        store: StateStore,
        registry: Registry,
        controller: ControllerInfo,
        metrics: Arc<Metrics>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            registry,
            controller,
            metrics,
            config,
        }
    }

    /// Periodic sweeps until shutdown is signalled.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "consistency sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep().await {
                        warn!(%error, "sweep pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("consistency sweep shutting down");
                    break;
                }
            }
        }
    }

    /// One full sweep: every pool, then store housekeeping.
    pub async fn sweep(&self) -> SweepResult<()> {
        for pool in self.store.list_pools()? {
            if let Err(error) = self.sweep_pool(&pool).await {
                // A pool we cannot list gets no action this round; the
                // next sweep tries again.
                warn!(pool_id = %pool.id, %error, "pool sweep skipped");
            }
        }
        self.purge_terminal_records()?;
        self.purge_stale_jobs()?;
        Ok(())
    }

    async fn sweep_pool(&self, pool: &Pool) -> SweepResult<()> {
        let provider = self.registry.bind(pool, &self.controller)?;
        let at_provider = provider.list_instances().await?;
        let records = self.store.list_instances_for_pool(&pool.id)?;

        // A terminal record no longer claims its compute.
        let known: HashSet<&str> = records
            .iter()
            .filter(|i| !i.status.is_terminal())
            .map(|i| i.name.as_str())
            .collect();
        let live: HashSet<&str> = at_provider.iter().map(|i| i.name.as_str()).collect();

        // Compute the store never heard of: delete it at the provider.
        for orphan in at_provider
            .iter()
            .filter(|i| !known.contains(i.name.as_str()))
        {
            warn!(instance = %orphan.name, pool_id = %pool.id, "removing orphaned compute");
            match provider.delete_instance(&orphan.name, false).await {
                Ok(()) | Err(ProviderError::NotFound(_)) => {
                    Metrics::inc(&self.metrics.sweep_orphans_removed);
                }
                Err(error) => {
                    warn!(instance = %orphan.name, %error, "orphan removal failed");
                }
            }
        }

        // Records whose compute vanished out from under us. Only
        // statuses the provider previously confirmed qualify; a
        // `creating` record may simply not be visible yet. Lost
        // instances are parked in `error`, never declared deleted on
        // the provider's behalf.
        let now = epoch_secs();
        for record in records.iter().filter(|r| {
            matches!(r.status, InstanceStatus::Running | InstanceStatus::Stopped)
                && !live.contains(r.name.as_str())
        }) {
            let mut updated = record.clone();
            if lifecycle::mark_error(&mut updated, "instance missing at provider", now).is_ok() {
                self.store.put_instance(&updated)?;
                Metrics::inc(&self.metrics.sweep_lost_instances);
                warn!(instance = %updated.name, pool_id = %pool.id, "instance missing at provider");
            }
        }

        Ok(())
    }

    /// Drop records in terminal status left behind by interrupted
    /// deletes.
    fn purge_terminal_records(&self) -> SweepResult<()> {
        for instance in self.store.list_instances()? {
            if instance.status.is_terminal() {
                self.store.delete_instance(&instance.name)?;
                debug!(instance = %instance.name, "terminal record purged");
            }
        }
        Ok(())
    }

    /// Drop completed jobs past the retention window.
    fn purge_stale_jobs(&self) -> SweepResult<()> {
        let now = epoch_secs();
        let retention = self.config.job_retention.as_secs();
        for job in self.store.list_jobs()? {
            if job.status == JobStatus::Completed
                && now.saturating_sub(job.updated_at) >= retention
            {
                self.store.delete_job(job.id)?;
                debug!(job_id = job.id, "stale completed job purged");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{
        EntityKind, Instance, Job, OsArch, OsType, RunnerStatus, DEFAULT_RUNNER_PREFIX,
    };
    use corral_provider::{FakeProvider, FakeProviderFactory};

    struct Harness {
        store: StateStore,
        fake: Arc<FakeProvider>,
        metrics: Arc<Metrics>,
        sweeper: Sweeper,
    }

    fn test_pool(id: &str) -> Pool {
        Pool {
            id: id.to_string(),
            entity_id: "entity-1".to_string(),
            provider_name: "fake".to_string(),
            image: "ubuntu-22.04".to_string(),
            flavor: "m1.small".to_string(),
            min_idle_runners: 0,
            max_runners: 5,
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

    fn stored_instance(name: &str, pool_id: &str, status: InstanceStatus) -> Instance {
        Instance {
            name: name.to_string(),
            pool_id: pool_id.to_string(),
            provider_id: Some(format!("fake-{name}")),
            status,
            runner_status: RunnerStatus::Idle,
            provider_fault: None,
            attempt: 0,
            force_delete: false,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn harness() -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_entity(&corral_core::Entity {
                id: "entity-1".to_string(),
                kind: EntityKind::Organization,
                owner: "acme".to_string(),
                name: String::new(),
                credentials_name: "acme-creds".to_string(),
            })
            .unwrap();
        store.put_pool(&test_pool("pool-1")).unwrap();
        let controller = store.init_controller_info().unwrap();

        let fake = FakeProvider::new();
        let mut registry = Registry::new();
        registry.register("fake", Arc::new(FakeProviderFactory::new(fake.clone())));

        let metrics = Arc::new(Metrics::new());
        let sweeper = Sweeper::new(
            store.clone(),
            registry,
            controller,
            metrics.clone(),
            SweepConfig::default(),
        );

        Harness {
            store,
            fake,
            metrics,
            sweeper,
        }
    }

    #[tokio::test]
    async fn orphaned_compute_is_removed_at_provider() {
        let h = harness();
        h.fake.inject_orphan("ghost");

        h.sweeper.sweep().await.unwrap();

        assert!(!h.fake.has_instance("ghost"));
        assert_eq!(Metrics::get(&h.metrics.sweep_orphans_removed), 1);
    }

    #[tokio::test]
    async fn tracked_compute_is_not_an_orphan() {
        let h = harness();
        h.fake.inject_orphan("corral-a");
        h.store
            .put_instance(&stored_instance("corral-a", "pool-1", InstanceStatus::Running))
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        assert!(h.fake.has_instance("corral-a"));
        assert_eq!(Metrics::get(&h.metrics.sweep_orphans_removed), 0);
    }

    #[tokio::test]
    async fn lost_instance_is_parked_in_error_never_deleted() {
        let h = harness();
        // The store believes it is running; the provider lost it.
        h.store
            .put_instance(&stored_instance("corral-a", "pool-1", InstanceStatus::Running))
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        let inst = h.store.get_instance("corral-a").unwrap().unwrap();
        assert_eq!(inst.status, InstanceStatus::Error);
        assert_eq!(
            inst.provider_fault.as_deref(),
            Some("instance missing at provider")
        );
        assert_eq!(Metrics::get(&h.metrics.sweep_lost_instances), 1);
    }

    #[tokio::test]
    async fn creating_records_are_not_lost() {
        let h = harness();
        h.store
            .put_instance(&stored_instance("corral-a", "pool-1", InstanceStatus::Creating))
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        assert_eq!(
            h.store.get_instance("corral-a").unwrap().unwrap().status,
            InstanceStatus::Creating
        );
        assert_eq!(Metrics::get(&h.metrics.sweep_lost_instances), 0);
    }

    #[tokio::test]
    async fn pending_delete_records_are_left_to_the_reconciler() {
        let h = harness();
        h.store
            .put_instance(&stored_instance(
                "corral-a",
                "pool-1",
                InstanceStatus::PendingDelete,
            ))
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        assert_eq!(
            h.store.get_instance("corral-a").unwrap().unwrap().status,
            InstanceStatus::PendingDelete
        );
    }

    #[tokio::test]
    async fn failed_listing_means_no_action() {
        let h = harness();
        h.store
            .put_instance(&stored_instance("corral-a", "pool-1", InstanceStatus::Running))
            .unwrap();
        h.fake.fail_next_lists(1);

        // The pool is skipped this round; nothing is marked lost.
        h.sweeper.sweep().await.unwrap();
        assert_eq!(
            h.store.get_instance("corral-a").unwrap().unwrap().status,
            InstanceStatus::Running
        );
        assert_eq!(Metrics::get(&h.metrics.sweep_lost_instances), 0);
    }

    #[tokio::test]
    async fn one_bad_pool_does_not_block_the_rest() {
        let h = harness();
        let mut bad = test_pool("pool-2");
        bad.provider_name = "no-such-provider".to_string();
        h.store.put_pool(&bad).unwrap();
        h.fake.inject_orphan("ghost");

        h.sweeper.sweep().await.unwrap();

        assert!(!h.fake.has_instance("ghost"));
    }

    #[tokio::test]
    async fn terminal_records_are_purged() {
        let h = harness();
        h.store
            .put_instance(&stored_instance("corral-a", "pool-1", InstanceStatus::Deleted))
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        assert!(h.store.get_instance("corral-a").unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_completed_jobs_are_purged_fresh_ones_kept() {
        let h = harness();
        let now = epoch_secs();
        h.store
            .put_job(&Job {
                id: 1,
                status: JobStatus::Completed,
                labels: vec![],
                runner_name: None,
                pool_id: None,
                updated_at: now - 3600,
            })
            .unwrap();
        h.store
            .put_job(&Job {
                id: 2,
                status: JobStatus::Completed,
                labels: vec![],
                runner_name: None,
                pool_id: None,
                updated_at: now,
            })
            .unwrap();
        h.store
            .put_job(&Job {
                id: 3,
                status: JobStatus::Queued,
                labels: vec![],
                runner_name: None,
                pool_id: None,
                updated_at: now - 3600,
            })
            .unwrap();

        h.sweeper.sweep().await.unwrap();

        assert!(h.store.get_job(1).unwrap().is_none());
        assert!(h.store.get_job(2).unwrap().is_some());
        // Queued jobs are demand, not history; retention does not apply.
        assert!(h.store.get_job(3).unwrap().is_some());
    }

    #[tokio::test]
    async fn run_loop_shuts_down() {
        let h = harness();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(h.sweeper.run(Duration::from_secs(3600), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
