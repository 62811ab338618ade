//! Extended external provider contract (v0.1.1).
//!
//! Every operation receives the full pool and controller objects as a
//! JSON payload on stdin, so providers can make placement and naming
//! decisions without extra round trips. Selected explicitly per
//! provider config; never the default.

use async_trait::async_trait;
use serde::Serialize;

use corral_core::{ControllerInfo, Pool};

use crate::error::ProviderResult;
use crate::external::ExternalRunner;
use crate::provider::{
    validate_provider_status, CreateInstanceParams, Provider, ProviderInstance,
};

/// Context every v0.1.1 payload carries.
#[derive(Debug, Serialize)]
struct V011Context<'a> {
    pool_info: &'a Pool,
    controller_info: &'a ControllerInfo,
}

/// Create payload: bootstrap parameters plus the full context.
#[derive(Debug, Serialize)]
struct V011CreatePayload<'a> {
    bootstrap_params: &'a CreateInstanceParams,
    pool_info: &'a Pool,
    controller_info: &'a ControllerInfo,
}

pub struct ExternalProviderV011 {
    runner: ExternalRunner,
    controller: ControllerInfo,
    pool: Pool,
}

impl ExternalProviderV011 {
    pub fn new(runner: ExternalRunner, controller: ControllerInfo, pool: Pool) -> Self {
        Self {
            runner,
            controller,
            pool,
        }
    }

    fn context(&self) -> ProviderResult<Vec<u8>> {
        Ok(serde_json::to_vec(&V011Context {
            pool_info: &self.pool,
            controller_info: &self.controller,
        })?)
    }

    fn base_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "CORRAL_CONTROLLER_ID".to_string(),
                self.controller.controller_id.to_string(),
            ),
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
impl Provider for ExternalProviderV011 {
    async fn create_instance(
        &self,
        params: CreateInstanceParams,
    ) -> ProviderResult<ProviderInstance> {
        let payload = serde_json::to_vec(&V011CreatePayload {
            bootstrap_params: &params,
            pool_info: &self.pool,
            controller_info: &self.controller,
        })?;
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
        self.runner
            .exec("DeleteInstance", &env, Some(self.context()?))
            .await?;
        Ok(())
    }

    async fn get_instance(&self, name: &str) -> ProviderResult<ProviderInstance> {
        let out = self
            .runner
            .exec("GetInstance", &self.instance_env(name), Some(self.context()?))
            .await?;
        Self::parse_instance(&out)
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let out = self
            .runner
            .exec("ListInstances", &self.base_env(), Some(self.context()?))
            .await?;
        let instances: Vec<ProviderInstance> = serde_json::from_slice(&out)?;
        for instance in &instances {
            validate_provider_status(instance.status)?;
        }
        Ok(instances)
    }

    async fn remove_all_instances(&self) -> ProviderResult<()> {
        self.runner
            .exec("RemoveAllInstances", &self.base_env(), Some(self.context()?))
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ProviderResult<()> {
        self.runner
            .exec("Stop", &self.instance_env(name), Some(self.context()?))
            .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> ProviderResult<()> {
        self.runner
            .exec("Start", &self.instance_env(name), Some(self.context()?))
            .await?;
        Ok(())
    }
}
