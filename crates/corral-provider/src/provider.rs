//! The provider contract.
//!
//! Every provider is bound at construction to one (pool, controller)
//! pair. The instance name is the idempotency key: callers may retry a
//! create or delete after a timeout with the same name without
//! double-provisioning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use corral_core::{InstanceStatus, OsArch, OsType, Pool};

use crate::error::{ProviderError, ProviderResult};

/// Bootstrap parameters for one instance creation. Identical across
/// contract versions; the extended contract additionally receives the
/// full pool and controller objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceParams {
    pub name: String,
    pub image: String,
    pub flavor: String,
    pub os_type: OsType,
    pub os_arch: OsArch,
    pub tags: Vec<String>,
    pub pool_id: String,
}

impl CreateInstanceParams {
    pub fn from_pool(pool: &Pool, name: String) -> Self {
        Self {
            name,
            image: pool.image.clone(),
            flavor: pool.flavor.clone(),
            os_type: pool.os_type,
            os_arch: pool.os_arch,
            tags: pool.tags.clone(),
            pool_id: pool.id.clone(),
        }
    }
}

/// A provider's view of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInstance {
    /// Opaque handle the provider uses for the compute resource.
    pub provider_id: String,
    /// The controller-assigned instance name.
    pub name: String,
    pub status: InstanceStatus,
}

/// Lifecycle states a provider is allowed to report.
///
/// A provider only manages the lifecycle of compute it was asked to
/// create; statuses implying create or remove intent are set by the
/// reconciler exclusively, so a misbehaving plugin can never trigger
/// destructive action on itself.
pub fn validate_provider_status(status: InstanceStatus) -> ProviderResult<InstanceStatus> {
    match status {
        InstanceStatus::Running
        | InstanceStatus::Error
        | InstanceStatus::Stopped
        | InstanceStatus::Unknown => Ok(status),
        other => Err(ProviderError::InvalidStatus(other.as_str().to_string())),
    }
}

/// Uniform contract over heterogeneous compute backends.
///
/// All calls are scoped to the (pool, controller) pair fixed at
/// construction and must be idempotent on retry with the same logical
/// request. `delete_instance` against a name the provider does not know
/// returns `ProviderError::NotFound`; callers treat that as success.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> ProviderResult<ProviderInstance>;

    async fn delete_instance(&self, name: &str, force: bool) -> ProviderResult<()>;

    async fn get_instance(&self, name: &str) -> ProviderResult<ProviderInstance>;

    /// List every instance the provider holds for this pool.
    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>>;

    async fn remove_all_instances(&self) -> ProviderResult<()>;

    async fn stop(&self, name: &str) -> ProviderResult<()>;

    async fn start(&self, name: &str) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_may_report_lifecycle_states_only() {
        assert!(validate_provider_status(InstanceStatus::Running).is_ok());
        assert!(validate_provider_status(InstanceStatus::Stopped).is_ok());
        assert!(validate_provider_status(InstanceStatus::Error).is_ok());
        assert!(validate_provider_status(InstanceStatus::Unknown).is_ok());
    }

    #[test]
    fn provider_may_not_report_intent_states() {
        for status in [
            InstanceStatus::Creating,
            InstanceStatus::PendingDelete,
            InstanceStatus::Deleting,
            InstanceStatus::Deleted,
        ] {
            assert!(matches!(
                validate_provider_status(status),
                Err(ProviderError::InvalidStatus(_))
            ));
        }
    }
}
