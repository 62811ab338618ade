//! Provider construction and lookup.
//!
//! A `Registry` maps configured provider names to factories; the
//! reconciler binds a provider to a (pool, controller) pair once per
//! pass. The contract version is selected from configuration at
//! construction time via an explicit adapter per version — no runtime
//! reflection.

use std::collections::HashMap;
use std::sync::Arc;

use corral_core::config::ProviderConfig;
use corral_core::types::InterfaceVersion;
use corral_core::{ControllerInfo, Pool};

use crate::error::{ProviderError, ProviderResult};
use crate::external::ExternalRunner;
use crate::provider::Provider;
use crate::v0_1_0::LegacyExternalProvider;
use crate::v0_1_1::ExternalProviderV011;

/// Builds a provider bound to one (pool, controller) pair.
pub trait ProviderFactory: Send + Sync {
    fn bind(
        &self,
        pool: &Pool,
        controller: &ControllerInfo,
    ) -> ProviderResult<Arc<dyn Provider>>;
}

/// Select the adapter matching the configured contract version.
///
/// A config that declares no version gets the legacy adapter, keeping
/// pre-existing provider binaries working unchanged.
pub fn external_provider(
    config: &ProviderConfig,
    pool: &Pool,
    controller: &ControllerInfo,
) -> ProviderResult<Arc<dyn Provider>> {
    let runner = ExternalRunner::from_config(config)?;
    let provider: Arc<dyn Provider> = match config.interface_version {
        InterfaceVersion::V0_1_0 => Arc::new(LegacyExternalProvider::new(
            runner,
            controller.controller_id.to_string(),
            pool.clone(),
        )),
        InterfaceVersion::V0_1_1 => {
            Arc::new(ExternalProviderV011::new(runner, *controller, pool.clone()))
        }
    };
    Ok(provider)
}

/// Factory for external providers, one per `[[provider]]` config block.
pub struct ExternalProviderFactory {
    config: ProviderConfig,
}

impl ExternalProviderFactory {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ProviderFactory for ExternalProviderFactory {
    fn bind(
        &self,
        pool: &Pool,
        controller: &ControllerInfo,
    ) -> ProviderResult<Arc<dyn Provider>> {
        external_provider(&self.config, pool, controller)
    }
}

/// Named provider factories, looked up per pool.
#[derive(Default, Clone)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from daemon configuration.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.register(
                &config.name,
                Arc::new(ExternalProviderFactory::new(config.clone())),
            );
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Bind the pool's configured provider to this controller.
    pub fn bind(
        &self,
        pool: &Pool,
        controller: &ControllerInfo,
    ) -> ProviderResult<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&pool.provider_name)
            .ok_or_else(|| ProviderError::UnknownProvider(pool.provider_name.clone()))?;
        factory.bind(pool, controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProviderFactory;
    use corral_core::{OsArch, OsType, DEFAULT_RUNNER_PREFIX};

    fn test_pool(provider_name: &str) -> Pool {
        Pool {
            id: "pool-1".to_string(),
            entity_id: "entity-1".to_string(),
            provider_name: provider_name.to_string(),
            image: "ubuntu-22.04".to_string(),
            flavor: "m1.small".to_string(),
            min_idle_runners: 1,
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

    #[test]
    fn unknown_provider_is_rejected() {
        let registry = Registry::new();
        let pool = test_pool("ghost");
        let controller = ControllerInfo::generate();

        assert!(matches!(
            registry.bind(&pool, &controller).err(),
            Some(ProviderError::UnknownProvider(name)) if name == "ghost"
        ));
    }

    #[test]
    fn registered_provider_binds() {
        let mut registry = Registry::new();
        registry.register("fake", Arc::new(FakeProviderFactory::default()));

        let pool = test_pool("fake");
        let controller = ControllerInfo::generate();
        assert!(registry.bind(&pool, &controller).is_ok());
        assert!(registry.contains("fake"));
    }
}
