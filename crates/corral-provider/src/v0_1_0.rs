//! Legacy external provider contract (v0.1.0).
//!
//! The minimal parameter set: the binary is keyed by the controller ID
//! string and the pool ID, delivered as environment variables. Only the
//! create operation carries a payload (the bootstrap parameters).
//! Providers written before the extended contract existed speak this
//! shape; it is also the default when a provider config declares no
//! version.

use async_trait::async_trait;

use corral_core::Pool;

use crate::error::ProviderResult;
use crate::external::ExternalRunner;
use crate::provider::{
    validate_provider_status, CreateInstanceParams, Provider, ProviderInstance,
};

pub struct LegacyExternalProvider {
    runner: ExternalRunner,
    controller_id: String,
    pool: Pool,
}

impl LegacyExternalProvider {
    pub fn new(runner: ExternalRunner, controller_id: String, pool: Pool) -> Self {
        Self {
            runner,
            controller_id,
            pool,
        }
    }

    fn base_env(&self) -> Vec<(String, String)> {
        vec![
            ("CORRAL_CONTROLLER_ID".to_string(), self.controller_id.clone()),
            ("CORRAL_POOL_ID".to_string(), self.pool.id.clone()),
        ]
    }

    fn instance_env(&self, name: &str) -> Vec<(String, String)> {
        let mut env = self.base_env();
        env.push(("CORRAL_INSTANCE_ID".to_string(), name.to_string()));
        env
    }

    fn parse_instance(raw: &[u8]) -> ProviderResult<ProviderInstance> {
        let instance: ProviderInstance = serde_json::from_slice(raw)?;
        validate_provider_status(instance.status)?;
        Ok(instance)
    }
}

#[async_trait]
impl Provider for LegacyExternalProvider {
    async fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> ProviderResult<ProviderInstance> {
        let payload = serde_json::to_vec(&params)?;
        let out = self
            .runner
            .exec("CreateInstance", &self.base_env(), Some(payload))
            .await?;
        Self::parse_instance(&out)
    }

    async fn delete_instance(&self, name: &str, force: bool) -> ProviderResult<()> {
        let mut env = self.instance_env(name);
        if force {
            env.push(("CORRAL_FORCE_DELETE".to_string(), "true".to_string()));
        }
        self.runner.exec("DeleteInstance", &env, None).await?;
        Ok(())
    }

    async fn get_instance(&self, name: &str) -> ProviderResult<ProviderInstance> {
        let out = self
            .runner
            .exec("GetInstance", &self.instance_env(name), None)
            .await?;
        Self::parse_instance(&out)
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let out = self
            .runner
            .exec("ListInstances", &self.base_env(), None)
            .await?;
        let instances: Vec<ProviderInstance> = serde_json::from_slice(&out)?;
        for instance in &instances {
            validate_provider_status(instance.status)?;
        }
        Ok(instances)
    }

    async fn remove_all_instances(&self) -> ProviderResult<()> {
        self.runner
            .exec("RemoveAllInstances", &self.base_env(), None)
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ProviderResult<()> {
        self.runner
            .exec("Stop", &self.instance_env(name), None)
            .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> ProviderResult<()> {
        self.runner
            .exec("Start", &self.instance_env(name), None)
            .await?;
        Ok(())
    }
}
