//! The per-pool reconcile pass and the loop that schedules it.
//!
//! One pass snapshots a pool's instances and derives every action from
//! that snapshot; actions never observe each other's results within the
//! same pass. Convergence comes from repetition, not from a single
//! clever pass: expired boots are parked in `error` this pass, queued
//! for deletion the next, and deleted the one after.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use corral_core::types::epoch_secs;
use corral_core::{ControllerInfo, Instance, InstanceStatus, Pool, RunnerStatus};
use corral_metrics::Metrics;
use corral_provider::{
    CreateInstanceParams, Provider, ProviderError, ProviderResult, Registry,
};
use corral_state::StateStore;

use crate::error::ReconcileResult;
use crate::lifecycle;
use crate::wake::WakeHandle;

/// Tuning knobs for the reconcile loop.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Provider call attempts within one pass before giving up.
    pub max_attempts: u32,
    /// Base delay between retries; doubles with every attempt.
    pub backoff_base: Duration,
    /// Deadline applied to every provider call. A call that overruns is
    /// abandoned and re-evaluated on the next pass; idempotency on the
    /// instance name makes the retry safe.
    pub provider_deadline: Duration,
    /// Delete retries across passes before an instance is left parked
    /// in `error` for an operator to resolve (force-delete is the
    /// escape hatch).
    pub max_delete_attempts: u32,
    /// Pools reconciled concurrently during a full pass.
    pub max_concurrent_pools: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            provider_deadline: Duration::from_secs(60),
            max_delete_attempts: 5,
            max_concurrent_pools: 4,
        }
    }
}

/// Drives every pool toward its declared min-idle/max shape.
pub struct Reconciler {
    store: StateStore,
    registry: Registry,
    controller: ControllerInfo,
    metrics: Arc<Metrics>,
    config: ReconcilerConfig,
    /// Per-pool locks; passes for the same pool are serialized.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    wake: WakeHandle,
    wake_rx: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<String>>>,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        registry: Registry,
        controller: ControllerInfo,
        metrics: Arc<Metrics>,
        config: ReconcilerConfig,
    ) -> Self {
        let (wake, wake_rx) = WakeHandle::channel();
        Self {
            store,
            registry,
            controller,
            metrics,
            config,
            locks: Mutex::new(HashMap::new()),
            wake,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    /// Handle for other components (the demand signal) to request an
    /// out-of-band pass for one pool.
    pub fn wake_handle(&self) -> WakeHandle {
        self.wake.clone()
    }

    fn pool_lock(&self, pool_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(pool_id.to_string()).or_default().clone()
    }

    // ── The loop ───────────────────────────────────────────────────

    /// Periodic full passes plus on-demand single-pool passes, until
    /// shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut wake_rx = match self
            .wake_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            Some(rx) => rx,
            None => {
                error!("reconciler run loop started twice");
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile_all().await;
                }
                maybe_pool = wake_rx.recv() => {
                    let Some(pool_id) = maybe_pool else { break };
                    self.wake.acknowledge(&pool_id);
                    debug!(%pool_id, "reconcile wake");
                    if let Err(error) = self.reconcile_pool(&pool_id).await {
                        warn!(%pool_id, %error, "woken reconcile pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// Reconcile every pool, a bounded number at a time.
    pub async fn reconcile_all(self: &Arc<Self>) {
        let pools = match self.store.list_pools() {
            Ok(pools) => pools,
            Err(error) => {
                error!(%error, "listing pools failed; skipping pass");
                return;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_pools));
        let mut handles = Vec::with_capacity(pools.len());
        for pool in pools {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if let Err(error) = this.reconcile_pool(&pool.id).await {
                    warn!(pool_id = %pool.id, %error, "reconcile pass failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ── One pass ───────────────────────────────────────────────────

    /// A single reconcile pass over one pool.
    pub async fn reconcile_pool(&self, pool_id: &str) -> ReconcileResult<()> {
        let lock = self.pool_lock(pool_id);
        let _guard = lock.lock().await;

        let Some(pool) = self.store.get_pool(pool_id)? else {
            debug!(%pool_id, "pool vanished before reconcile");
            return Ok(());
        };
        let provider = self.registry.bind(&pool, &self.controller)?;
        let now = epoch_secs();

        let snapshot = self.store.list_instances_for_pool(pool_id)?;

        self.expire_stale_boots(&pool, &snapshot, now)?;
        self.requeue_errored(&snapshot, now)?;

        let idle = snapshot.iter().filter(|i| i.is_idle()).count() as u32;
        // Everything non-terminal consumes provider capacity, including
        // instances already queued for deletion.
        let total = snapshot
            .iter()
            .filter(|i| i.status.counts_toward_cap())
            .count() as u32;
        // Surplus is judged against instances that are staying; ones
        // already on their way out must not be counted twice.
        let live = snapshot
            .iter()
            .filter(|i| {
                i.status.counts_toward_cap()
                    && !matches!(
                        i.status,
                        InstanceStatus::PendingDelete | InstanceStatus::Deleting
                    )
            })
            .count() as u32;

        if pool.enabled {
            match pool.validate() {
                Ok(()) => {
                    let headroom = pool.max_runners.saturating_sub(total);
                    let deficit = pool.min_idle_runners.saturating_sub(idle).min(headroom);
                    if deficit > 0 {
                        debug!(pool_id = %pool.id, deficit, idle, total, "scaling up");
                    }
                    for _ in 0..deficit {
                        self.create_instance(&pool, provider.as_ref()).await?;
                    }
                }
                Err(error) => {
                    warn!(pool_id = %pool.id, %error, "pool configuration invalid; scale-up suspended");
                }
            }
        }

        self.remove_surplus(&pool, &snapshot, live, now)?;

        for instance in snapshot
            .iter()
            .filter(|i| i.status == InstanceStatus::PendingDelete)
        {
            self.delete_instance(instance.clone(), provider.as_ref())
                .await?;
        }

        Ok(())
    }

    /// Park instances stuck in `creating` past the pool's bootstrap
    /// deadline. They are queued for deletion on the next pass.
    fn expire_stale_boots(
        &self,
        pool: &Pool,
        snapshot: &[Instance],
        now: u64,
    ) -> ReconcileResult<()> {
        for instance in snapshot
            .iter()
            .filter(|i| i.status == InstanceStatus::Creating)
        {
            let age = now.saturating_sub(instance.created_at);
            if age > pool.bootstrap_timeout_secs {
                let mut updated = instance.clone();
                lifecycle::mark_error(
                    &mut updated,
                    format!("bootstrap deadline exceeded after {age}s"),
                    now,
                )?;
                self.store.put_instance(&updated)?;
                warn!(instance = %updated.name, age_secs = age, "bootstrap timed out");
            }
        }
        Ok(())
    }

    /// Queue errored instances for deletion, up to the cross-pass retry
    /// bound. Beyond it the record stays parked in `error`, visible to
    /// operators, never silently dropped.
    fn requeue_errored(&self, snapshot: &[Instance], now: u64) -> ReconcileResult<()> {
        for instance in snapshot
            .iter()
            .filter(|i| i.status == InstanceStatus::Error)
        {
            if instance.attempt >= self.config.max_delete_attempts {
                debug!(
                    instance = %instance.name,
                    attempts = instance.attempt,
                    "delete retries exhausted; leaving parked in error"
                );
                continue;
            }
            let mut updated = instance.clone();
            lifecycle::transition(&mut updated, InstanceStatus::PendingDelete, now)?;
            self.store.put_instance(&updated)?;
        }
        Ok(())
    }

    /// Mark the oldest idle instances for deletion when the pool holds
    /// more than `max_runners`. Instances with an assigned job are
    /// never candidates.
    fn remove_surplus(
        &self,
        pool: &Pool,
        snapshot: &[Instance],
        live: u32,
        now: u64,
    ) -> ReconcileResult<()> {
        let surplus = live.saturating_sub(pool.max_runners) as usize;
        if surplus == 0 {
            return Ok(());
        }

        let mut candidates: Vec<&Instance> =
            snapshot.iter().filter(|i| i.is_idle()).collect();
        candidates.sort_by_key(|i| i.created_at);

        for instance in candidates.into_iter().take(surplus) {
            let mut updated = instance.clone();
            lifecycle::transition(&mut updated, InstanceStatus::PendingDelete, now)?;
            self.store.put_instance(&updated)?;
            debug!(instance = %updated.name, pool_id = %pool.id, "surplus instance queued for deletion");
        }
        Ok(())
    }

    /// Create one instance: record first, then call the provider. A
    /// crash between the two leaves a `creating` record the bootstrap
    /// deadline or consistency sweep resolves.
    async fn create_instance(
        &self,
        pool: &Pool,
        provider: &dyn Provider,
    ) -> ReconcileResult<()> {
        let name = pool.new_runner_name();
        let mut instance = Instance::new(pool, name.clone(), epoch_secs());
        self.store.put_instance(&instance)?;

        Metrics::inc(&self.metrics.instance_create_attempts);
        let params = CreateInstanceParams::from_pool(pool, name.clone());
        match self
            .call_provider(|| provider.create_instance(params.clone()))
            .await
        {
            Ok(created) => {
                instance.provider_id = Some(created.provider_id);
                match created.status {
                    InstanceStatus::Running => {
                        lifecycle::transition(
                            &mut instance,
                            InstanceStatus::Running,
                            epoch_secs(),
                        )?;
                        // A booted runner registers itself with the CI
                        // platform; it is warm capacity until a job
                        // claims it.
                        instance.runner_status = RunnerStatus::Idle;
                    }
                    InstanceStatus::Stopped => {
                        lifecycle::transition(
                            &mut instance,
                            InstanceStatus::Stopped,
                            epoch_secs(),
                        )?;
                    }
                    // `unknown` (or a provider that stays silent on
                    // boot) leaves the record in `creating`; the
                    // bootstrap deadline bounds how long.
                    _ => {}
                }
                self.store.put_instance(&instance)?;
                debug!(instance = %name, status = %instance.status, "instance created");
            }
            Err(error) => {
                Metrics::inc(&self.metrics.instance_create_failures);
                lifecycle::mark_error(&mut instance, error.to_string(), epoch_secs())?;
                self.store.put_instance(&instance)?;
                warn!(instance = %name, %error, "create failed; instance parked in error");
            }
        }
        Ok(())
    }

    /// Drive one `pending_delete` instance through the provider. A
    /// provider that no longer knows the name already satisfied the
    /// request, so `NotFound` counts as success.
    async fn delete_instance(
        &self,
        mut instance: Instance,
        provider: &dyn Provider,
    ) -> ReconcileResult<()> {
        lifecycle::transition(&mut instance, InstanceStatus::Deleting, epoch_secs())?;
        self.store.put_instance(&instance)?;

        Metrics::inc(&self.metrics.instance_delete_attempts);
        let name = instance.name.clone();
        let force = instance.force_delete;
        match self
            .call_provider(|| provider.delete_instance(&name, force))
            .await
        {
            Ok(()) | Err(ProviderError::NotFound(_)) => {
                lifecycle::transition(&mut instance, InstanceStatus::Deleted, epoch_secs())?;
                self.store.delete_instance(&name)?;
                debug!(instance = %name, "instance deleted");
            }
            Err(error) => {
                Metrics::inc(&self.metrics.instance_delete_failures);
                if force {
                    // The operator chose losing the record over keeping
                    // it; the compute may leak at the provider.
                    Metrics::inc(&self.metrics.force_deletes);
                    warn!(instance = %name, %error, "force delete: purging record despite provider failure");
                    self.store.delete_instance(&name)?;
                } else {
                    instance.attempt += 1;
                    lifecycle::mark_error(&mut instance, error.to_string(), epoch_secs())?;
                    self.store.put_instance(&instance)?;
                    warn!(
                        instance = %name,
                        attempt = instance.attempt,
                        %error,
                        "delete failed; will retry"
                    );
                }
            }
        }
        Ok(())
    }

    /// Run one provider call under the configured deadline, retrying
    /// transient failures with exponential backoff. Timeouts count as
    /// transient: the call is abandoned and the instance name makes a
    /// later retry idempotent.
    async fn call_provider<T, F, Fut>(&self, op: F) -> ProviderResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            Metrics::inc(&self.metrics.provider_op_attempts);
            let outcome = tokio::time::timeout(self.config.provider_deadline, op()).await;
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => {
                    ProviderError::Transient("provider call deadline exceeded".to_string())
                }
            };
            Metrics::inc(&self.metrics.provider_op_failures);
            if !err.is_transient() || attempt >= self.config.max_attempts {
                return Err(err);
            }
            tokio::time::sleep(self.config.backoff_base * 2u32.pow(attempt - 1)).await;
        }
    }
}
