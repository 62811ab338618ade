//! The job-event consumer.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use corral_core::types::epoch_secs;
use corral_core::{Instance, InstanceStatus, Job, JobStatus, RunnerStatus};
use corral_metrics::Metrics;
use corral_reconciler::{lifecycle, WakeHandle};
use corral_state::StateStore;
use std::sync::Arc;

use crate::error::DemandResult;

/// Consumes job events and translates them into runner-status updates
/// and reconcile wake-ups.
pub struct DemandSignal {
    store: StateStore,
    metrics: Arc<Metrics>,
    wake: WakeHandle,
}

impl DemandSignal {
    pub fn new(store: StateStore, metrics: Arc<Metrics>, wake: WakeHandle) -> Self {
        Self {
            store,
            metrics,
            wake,
        }
    }

    /// Drain job events until the channel closes or shutdown is
    /// signalled.
    pub async fn run(
        self,
        mut jobs: mpsc::Receiver<Job>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("demand signal started");
        loop {
            tokio::select! {
                maybe_job = jobs.recv() => {
                    let Some(job) = maybe_job else { break };
                    if let Err(error) = self.handle_job(job) {
                        warn!(%error, "job event handling failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("demand signal shutting down");
                    break;
                }
            }
        }
    }

    /// Process one job event. Delivery is at-least-once; a redelivery
    /// (same id, same status) is counted and dropped.
    pub fn handle_job(&self, mut job: Job) -> DemandResult<()> {
        Metrics::inc(&self.metrics.jobs_received);

        if let Some(cached) = self.store.get_job(job.id)? {
            if cached.status == job.status {
                Metrics::inc(&self.metrics.jobs_deduplicated);
                debug!(job_id = job.id, status = ?job.status, "duplicate job event dropped");
                return Ok(());
            }
            // Carry forward the pool assignment made at queue time.
            if job.pool_id.is_none() {
                job.pool_id = cached.pool_id.clone();
            }
        }
        job.updated_at = epoch_secs();

        match job.status {
            JobStatus::Queued => self.on_queued(job),
            JobStatus::InProgress => self.on_in_progress(job),
            JobStatus::Completed => self.on_completed(job),
        }
    }

    /// A queued job is demand: match it to a pool and wake that pool's
    /// reconciler so capacity exists when the platform schedules it.
    fn on_queued(&self, mut job: Job) -> DemandResult<()> {
        let matched = self
            .store
            .list_pools()?
            .into_iter()
            .find(|pool| pool.enabled && pool.matches_labels(&job.labels));

        match matched {
            Some(pool) => {
                job.pool_id = Some(pool.id.clone());
                self.store.put_job(&job)?;
                debug!(job_id = job.id, pool_id = %pool.id, "queued job matched to pool");
                self.wake.wake(&pool.id);
            }
            None => {
                // Cached anyway: an operator creating a matching pool
                // later can see what demand went unserved.
                self.store.put_job(&job)?;
                debug!(job_id = job.id, labels = ?job.labels, "no pool matches queued job");
            }
        }
        Ok(())
    }

    /// The platform assigned the job to a runner: mark it busy so the
    /// reconciler stops counting it as warm capacity.
    fn on_in_progress(&self, mut job: Job) -> DemandResult<()> {
        if let Some(mut instance) = self.instance_for(&job)? {
            instance.runner_status = RunnerStatus::Active;
            instance.updated_at = job.updated_at;
            job.pool_id = Some(instance.pool_id.clone());
            self.store.put_instance(&instance)?;
            debug!(job_id = job.id, instance = %instance.name, "runner marked active");
        }
        self.store.put_job(&job)?;
        Ok(())
    }

    /// Ephemeral runners take exactly one job: completion terminates
    /// the runner and queues its instance for deletion, then wakes the
    /// pool so replacement capacity gets provisioned.
    fn on_completed(&self, mut job: Job) -> DemandResult<()> {
        if let Some(mut instance) = self.instance_for(&job)? {
            instance.runner_status = RunnerStatus::Terminated;
            if instance.status.can_transition_to(InstanceStatus::PendingDelete) {
                lifecycle::transition(
                    &mut instance,
                    InstanceStatus::PendingDelete,
                    job.updated_at,
                )?;
            }
            instance.updated_at = job.updated_at;
            job.pool_id = Some(instance.pool_id.clone());
            self.store.put_instance(&instance)?;
            debug!(job_id = job.id, instance = %instance.name, "runner terminated after job");
            self.store.put_job(&job)?;
            self.wake.wake(&instance.pool_id);
        } else {
            self.store.put_job(&job)?;
        }
        Ok(())
    }

    /// Resolve the runner a job claims to run on. Runners created by
    /// other controllers (or never tracked) resolve to `None` and the
    /// event only updates the job cache.
    fn instance_for(&self, job: &Job) -> DemandResult<Option<Instance>> {
        let Some(runner_name) = job.runner_name.as_deref() else {
            return Ok(None);
        };
        let instance = self.store.get_instance(runner_name)?;
        if instance.is_none() {
            debug!(job_id = job.id, runner = runner_name, "job references unknown runner");
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{EntityKind, OsArch, OsType, Pool, DEFAULT_RUNNER_PREFIX};

    struct Harness {
        store: StateStore,
        metrics: Arc<Metrics>,
        signal: DemandSignal,
        wakes: mpsc::UnboundedReceiver<String>,
    }

    fn test_pool(id: &str, tags: &[&str]) -> Pool {
        Pool {
            id: id.to_string(),
            entity_id: "entity-1".to_string(),
            provider_name: "fake".to_string(),
            image: "ubuntu-22.04".to_string(),
            flavor: "m1.small".to_string(),
            min_idle_runners: 1,
            max_runners: 5,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            enabled: true,
            os_type: OsType::Linux,
            os_arch: OsArch::Amd64,
            runner_prefix: DEFAULT_RUNNER_PREFIX.to_string(),
            bootstrap_timeout_secs: 1200,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn idle_instance(name: &str, pool_id: &str) -> Instance {
        Instance {
            name: name.to_string(),
            pool_id: pool_id.to_string(),
            provider_id: Some(format!("fake-{name}")),
            status: InstanceStatus::Running,
            runner_status: RunnerStatus::Idle,
            provider_fault: None,
            attempt: 0,
            force_delete: false,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn job(id: i64, status: JobStatus, labels: &[&str], runner: Option<&str>) -> Job {
        Job {
            id,
            status,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            runner_name: runner.map(|r| r.to_string()),
            pool_id: None,
            updated_at: 0,
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
        let metrics = Arc::new(Metrics::new());
        let (wake, wakes) = WakeHandle::channel();
        let signal = DemandSignal::new(store.clone(), metrics.clone(), wake);
        Harness {
            store,
            metrics,
            signal,
            wakes,
        }
    }

    #[test]
    fn queued_job_matches_pool_and_wakes_it() {
        let mut h = harness();
        h.store
            .put_pool(&test_pool("pool-1", &["self-hosted", "linux"]))
            .unwrap();

        h.signal
            .handle_job(job(
                1,
                JobStatus::Queued,
                &["self-hosted", "Linux", "x64"],
                None,
            ))
            .unwrap();

        let cached = h.store.get_job(1).unwrap().unwrap();
        assert_eq!(cached.pool_id.as_deref(), Some("pool-1"));
        assert_eq!(h.wakes.try_recv().unwrap(), "pool-1");
    }

    #[test]
    fn queued_job_skips_disabled_pools() {
        let mut h = harness();
        let mut disabled = test_pool("pool-1", &["self-hosted"]);
        disabled.enabled = false;
        h.store.put_pool(&disabled).unwrap();

        h.signal
            .handle_job(job(1, JobStatus::Queued, &["self-hosted"], None))
            .unwrap();

        let cached = h.store.get_job(1).unwrap().unwrap();
        assert!(cached.pool_id.is_none());
        assert!(h.wakes.try_recv().is_err());
    }

    #[test]
    fn unmatched_job_is_cached_for_visibility() {
        let h = harness();
        h.signal
            .handle_job(job(1, JobStatus::Queued, &["gpu"], None))
            .unwrap();

        assert!(h.store.get_job(1).unwrap().unwrap().pool_id.is_none());
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let h = harness();
        h.store
            .put_pool(&test_pool("pool-1", &["self-hosted"]))
            .unwrap();

        let event = job(1, JobStatus::Queued, &["self-hosted"], None);
        h.signal.handle_job(event.clone()).unwrap();
        h.signal.handle_job(event).unwrap();

        assert_eq!(Metrics::get(&h.metrics.jobs_received), 2);
        assert_eq!(Metrics::get(&h.metrics.jobs_deduplicated), 1);
    }

    #[test]
    fn status_progression_is_not_deduplicated() {
        let h = harness();
        h.store
            .put_pool(&test_pool("pool-1", &["self-hosted"]))
            .unwrap();
        h.store.put_instance(&idle_instance("corral-a", "pool-1")).unwrap();

        h.signal
            .handle_job(job(1, JobStatus::Queued, &["self-hosted"], None))
            .unwrap();
        h.signal
            .handle_job(job(1, JobStatus::InProgress, &["self-hosted"], Some("corral-a")))
            .unwrap();

        assert_eq!(Metrics::get(&h.metrics.jobs_deduplicated), 0);
        assert_eq!(
            h.store.get_job(1).unwrap().unwrap().status,
            JobStatus::InProgress
        );
    }

    #[test]
    fn in_progress_marks_runner_active() {
        let h = harness();
        h.store.put_instance(&idle_instance("corral-a", "pool-1")).unwrap();

        h.signal
            .handle_job(job(1, JobStatus::InProgress, &[], Some("corral-a")))
            .unwrap();

        let inst = h.store.get_instance("corral-a").unwrap().unwrap();
        assert_eq!(inst.runner_status, RunnerStatus::Active);
        assert_eq!(inst.status, InstanceStatus::Running);
        assert_eq!(
            h.store.get_job(1).unwrap().unwrap().pool_id.as_deref(),
            Some("pool-1")
        );
    }

    #[test]
    fn completed_job_terminates_runner_and_wakes_pool() {
        let mut h = harness();
        let mut busy = idle_instance("corral-a", "pool-1");
        busy.runner_status = RunnerStatus::Active;
        h.store.put_instance(&busy).unwrap();

        h.signal
            .handle_job(job(1, JobStatus::Completed, &[], Some("corral-a")))
            .unwrap();

        let inst = h.store.get_instance("corral-a").unwrap().unwrap();
        assert_eq!(inst.runner_status, RunnerStatus::Terminated);
        assert_eq!(inst.status, InstanceStatus::PendingDelete);
        assert_eq!(h.wakes.try_recv().unwrap(), "pool-1");
    }

    #[test]
    fn completed_event_for_unknown_runner_only_updates_cache() {
        let mut h = harness();

        h.signal
            .handle_job(job(1, JobStatus::Completed, &[], Some("someone-elses-runner")))
            .unwrap();

        assert_eq!(
            h.store.get_job(1).unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert!(h.wakes.try_recv().is_err());
    }

    #[test]
    fn redelivered_completion_is_idempotent() {
        let h = harness();
        let mut busy = idle_instance("corral-a", "pool-1");
        busy.runner_status = RunnerStatus::Active;
        h.store.put_instance(&busy).unwrap();

        let done = job(1, JobStatus::Completed, &[], Some("corral-a"));
        h.signal.handle_job(done.clone()).unwrap();
        h.signal.handle_job(done).unwrap();

        let inst = h.store.get_instance("corral-a").unwrap().unwrap();
        assert_eq!(inst.status, InstanceStatus::PendingDelete);
        assert_eq!(Metrics::get(&h.metrics.jobs_deduplicated), 1);
    }

    #[tokio::test]
    async fn run_loop_consumes_until_shutdown() {
        let h = harness();
        h.store
            .put_pool(&test_pool("pool-1", &["self-hosted"]))
            .unwrap();
        let store = h.store.clone();

        let (job_tx, job_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(h.signal.run(job_rx, shutdown_rx));

        job_tx
            .send(job(1, JobStatus::Queued, &["self-hosted"], None))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.get_job(1).unwrap().is_some());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
