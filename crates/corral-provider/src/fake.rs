//! Deterministic in-memory provider for tests.
//!
//! `FakeProvider` behaves like a well-behaved cloud: creates succeed
//! and report `running`, deletes of unknown names return `NotFound`.
//! Failure modes are scriptable so reconciler and sweeper tests can
//! simulate flaky or lossy backends without a real provider binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use corral_core::{ControllerInfo, InstanceStatus, Pool};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CreateInstanceParams, Provider, ProviderInstance};
use crate::registry::ProviderFactory;

#[derive(Default)]
struct Inner {
    instances: BTreeMap<String, ProviderInstance>,
    /// Remaining creates to fail with a transient error.
    fail_creates: u32,
    /// Fail every create with a permanent error.
    reject_creates: bool,
    /// Remaining deletes to fail with a transient error.
    fail_deletes: u32,
    /// Remaining list calls to fail with a transient error.
    fail_lists: u32,
    /// Status reported for freshly created instances.
    boot_status: Option<InstanceStatus>,
    /// Artificial latency per create call.
    create_delay: Option<Duration>,
}

/// Scriptable fake compute backend.
#[derive(Default)]
pub struct FakeProvider {
    inner: Mutex<Inner>,
    create_calls: AtomicU64,
    delete_calls: AtomicU64,
    list_calls: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` create calls with a transient error.
    pub fn fail_next_creates(&self, n: u32) {
        self.inner.lock().unwrap().fail_creates = n;
    }

    /// Reject every create with a permanent error (quota-style).
    pub fn reject_creates(&self, reject: bool) {
        self.inner.lock().unwrap().reject_creates = reject;
    }

    /// Fail the next `n` delete calls with a transient error.
    pub fn fail_next_deletes(&self, n: u32) {
        self.inner.lock().unwrap().fail_deletes = n;
    }

    /// Fail the next `n` list calls with a transient error.
    pub fn fail_next_lists(&self, n: u32) {
        self.inner.lock().unwrap().fail_lists = n;
    }

    /// Status reported for new instances (default `running`). Use
    /// `unknown` to simulate a provider that never confirms boot.
    pub fn set_boot_status(&self, status: InstanceStatus) {
        self.inner.lock().unwrap().boot_status = Some(status);
    }

    /// Add artificial latency to create calls.
    pub fn set_create_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().create_delay = Some(delay);
    }

    /// Insert a provider-side instance the store knows nothing about.
    pub fn inject_orphan(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.instances.insert(
            name.to_string(),
            ProviderInstance {
                provider_id: format!("fake-{name}"),
                name: name.to_string(),
                status: InstanceStatus::Running,
            },
        );
    }

    /// Drop a provider-side instance out from under the store.
    pub fn lose_instance(&self, name: &str) {
        self.inner.lock().unwrap().instances.remove(name);
    }

    pub fn instance_count(&self) -> usize {
        self.inner.lock().unwrap().instances.len()
    }

    pub fn has_instance(&self, name: &str) -> bool {
        self.inner.lock().unwrap().instances.contains_key(name)
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls.load(Ordering::Relaxed)
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> ProviderResult<ProviderInstance> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);

        let delay = self.inner.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.reject_creates {
            return Err(ProviderError::Permanent("create rejected".to_string()));
        }
        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(ProviderError::Transient("create failed".to_string()));
        }

        // Idempotent on the instance name: a retried create returns the
        // instance provisioned by the first attempt.
        if let Some(existing) = inner.instances.get(&params.name) {
            return Ok(existing.clone());
        }

        let instance = ProviderInstance {
            provider_id: format!("fake-{}", params.name),
            name: params.name.clone(),
            status: inner.boot_status.unwrap_or(InstanceStatus::Running),
        };
        inner.instances.insert(params.name, instance.clone());
        Ok(instance)
    }

    async fn delete_instance(&self, name: &str, _force: bool) -> ProviderResult<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_deletes > 0 {
            inner.fail_deletes -= 1;
            return Err(ProviderError::Transient("delete failed".to_string()));
        }
        match inner.instances.remove(name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }

    async fn get_instance(&self, name: &str) -> ProviderResult<ProviderInstance> {
        let inner = self.inner.lock().unwrap();
        inner
            .instances
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_lists > 0 {
            inner.fail_lists -= 1;
            return Err(ProviderError::Transient("list failed".to_string()));
        }
        Ok(inner.instances.values().cloned().collect())
    }

    async fn remove_all_instances(&self) -> ProviderResult<()> {
        self.inner.lock().unwrap().instances.clear();
        Ok(())
    }

    async fn stop(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.instances.get_mut(name) {
            Some(instance) => {
                instance.status = InstanceStatus::Stopped;
                Ok(())
            }
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }

    async fn start(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.instances.get_mut(name) {
            Some(instance) => {
                instance.status = InstanceStatus::Running;
                Ok(())
            }
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }
}

/// Factory handing out the same shared fake, so test state survives
/// across reconciliation passes.
#[derive(Default)]
pub struct FakeProviderFactory {
    provider: Arc<FakeProvider>,
}

impl FakeProviderFactory {
    pub fn new(provider: Arc<FakeProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> Arc<FakeProvider> {
        self.provider.clone()
    }
}

impl ProviderFactory for FakeProviderFactory {
    fn bind(
        &self,
        _pool: &Pool,
        _controller: &ControllerInfo,
    ) -> ProviderResult<Arc<dyn Provider>> {
        Ok(self.provider.clone())
    }
}
