//! corral.toml configuration parser.
//!
//! The daemon reads one TOML file describing itself (data directory,
//! loop intervals) and the providers it can create compute through.
//! Providers are external binaries; their configuration is validated
//! up front so a bad path fails at startup, not mid-reconciliation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::InterfaceVersion;

/// Environment variable prefix reserved for the controller itself.
/// Host variables with this prefix are never forwarded to provider
/// subprocesses, so a provider cannot be fed forged controller state.
pub const RESERVED_ENV_PREFIX: &str = "CORRAL_";

/// Conventional binary name looked up inside `provider_dir`.
pub const PROVIDER_BINARY_NAME: &str = "corral-external-provider";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("provider {0}: neither provider_executable nor provider_dir is set")]
    NoExecutable(String),

    #[error("provider {name}: executable path must be absolute: {path}")]
    RelativePath { name: String, path: PathBuf },

    #[error("provider {name}: cannot access {path}: {source}")]
    Inaccessible {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("provider {name}: {path} is not executable")]
    NotExecutable { name: String, path: PathBuf },

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorralConfig {
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    /// Seconds between periodic reconciliation passes. Defaults to 30.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Seconds between consistency sweeps. Defaults to 300.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Configured providers, selected per pool by name.
    #[serde(default, rename = "provider")]
    pub providers: Vec<ProviderConfig>,
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    300
}

impl CorralConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CorralConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all provider blocks and reject duplicate names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
            provider.external.validate(&provider.name)?;
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// One configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name pools reference via `provider_name`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Contract version spoken by the external binary. Absent means
    /// the legacy `v0.1.0` contract.
    #[serde(default)]
    pub interface_version: InterfaceVersion,
    pub external: ExternalConfig,
}

/// Configuration for an external (out-of-process) provider.
///
/// The external provider delegates all compute operations to a binary,
/// so backends can be written in any language while staying compatible
/// with the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalConfig {
    /// Path passed to the binary as `CORRAL_PROVIDER_CONFIG`. The
    /// binary uses it for whatever cloud-specific settings it needs.
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    /// Directory expected to contain a `corral-external-provider`
    /// executable.
    #[serde(default)]
    pub provider_dir: Option<PathBuf>,
    /// Full path to the provider executable. Takes precedence over
    /// `provider_dir`.
    #[serde(default)]
    pub provider_executable: Option<PathBuf>,
    /// Host environment variable name prefixes forwarded to the binary.
    /// Names matching `RESERVED_ENV_PREFIX` are never forwarded.
    #[serde(default)]
    pub environment_variables: Vec<String>,
}

impl ExternalConfig {
    /// Resolve the executable path: explicit path wins, otherwise the
    /// conventional binary name inside `provider_dir`.
    pub fn executable_path(&self, provider_name: &str) -> Result<PathBuf, ConfigError> {
        let path = match (&self.provider_executable, &self.provider_dir) {
            (Some(exec), _) => exec.clone(),
            (None, Some(dir)) => dir.join(PROVIDER_BINARY_NAME),
            (None, None) => {
                return Err(ConfigError::NoExecutable(provider_name.to_string()));
            }
        };
        if !path.is_absolute() {
            return Err(ConfigError::RelativePath {
                name: provider_name.to_string(),
                path,
            });
        }
        Ok(path)
    }

    /// Check the executable exists and is runnable, and that any
    /// declared config file is reachable.
    pub fn validate(&self, provider_name: &str) -> Result<(), ConfigError> {
        if let Some(config_file) = &self.config_file {
            std::fs::metadata(config_file).map_err(|source| ConfigError::Inaccessible {
                name: provider_name.to_string(),
                path: config_file.clone(),
                source,
            })?;
        }

        let path = self.executable_path(provider_name)?;
        let meta = std::fs::metadata(&path).map_err(|source| ConfigError::Inaccessible {
            name: provider_name.to_string(),
            path: path.clone(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                return Err(ConfigError::NotExecutable {
                    name: provider_name.to_string(),
                    path,
                });
            }
        }
        #[cfg(not(unix))]
        let _ = meta;

        Ok(())
    }

    /// Host environment variables to forward to the provider binary,
    /// selected by prefix match against `environment_variables`.
    pub fn forwarded_environment(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        for (key, value) in std::env::vars() {
            if key.starts_with(RESERVED_ENV_PREFIX) {
                continue;
            }
            if self
                .environment_variables
                .iter()
                .any(|prefix| key.starts_with(prefix.as_str()))
            {
                vars.push((key, value));
            }
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn executable_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\nexit 0").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executable_file(dir.path(), "my-provider");

        let toml_str = format!(
            r#"
data_dir = "/var/lib/corral"

[[provider]]
name = "openstack"
description = "test provider"
interface_version = "v0.1.1"

[provider.external]
provider_executable = "{}"
environment_variables = ["OS_"]
"#,
            exec.display()
        );

        let config: CorralConfig = toml::from_str(&toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.reconcile_interval_secs, 30);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(
            config.providers[0].interface_version,
            InterfaceVersion::V0_1_1
        );
    }

    #[test]
    fn omitted_interface_version_is_legacy() {
        let toml_str = r#"
data_dir = "/var/lib/corral"

[[provider]]
name = "lxd"

[provider.external]
provider_executable = "/usr/bin/true"
"#;
        let config: CorralConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.providers[0].interface_version,
            InterfaceVersion::V0_1_0
        );
    }

    #[test]
    fn executable_path_prefers_explicit() {
        let external = ExternalConfig {
            provider_dir: Some(PathBuf::from("/opt/providers")),
            provider_executable: Some(PathBuf::from("/usr/bin/custom")),
            ..Default::default()
        };
        assert_eq!(
            external.executable_path("p").unwrap(),
            PathBuf::from("/usr/bin/custom")
        );
    }

    #[test]
    fn executable_path_falls_back_to_provider_dir() {
        let external = ExternalConfig {
            provider_dir: Some(PathBuf::from("/opt/providers")),
            ..Default::default()
        };
        assert_eq!(
            external.executable_path("p").unwrap(),
            PathBuf::from("/opt/providers/corral-external-provider")
        );
    }

    #[test]
    fn relative_executable_is_rejected() {
        let external = ExternalConfig {
            provider_executable: Some(PathBuf::from("bin/provider")),
            ..Default::default()
        };
        assert!(matches!(
            external.executable_path("p"),
            Err(ConfigError::RelativePath { .. })
        ));
    }

    #[test]
    fn missing_executable_fails_validation() {
        let external = ExternalConfig {
            provider_executable: Some(PathBuf::from("/nonexistent/provider")),
            ..Default::default()
        };
        assert!(matches!(
            external.validate("p"),
            Err(ConfigError::Inaccessible { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider");
        std::fs::write(&path, "not a binary").unwrap();

        let external = ExternalConfig {
            provider_executable: Some(path),
            ..Default::default()
        };
        assert!(matches!(
            external.validate("p"),
            Err(ConfigError::NotExecutable { .. })
        ));
    }

    #[test]
    fn duplicate_provider_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executable_file(dir.path(), "provider");
        let provider = ProviderConfig {
            name: "dup".to_string(),
            description: String::new(),
            interface_version: InterfaceVersion::default(),
            external: ExternalConfig {
                provider_executable: Some(exec),
                ..Default::default()
            },
        };
        let config = CorralConfig {
            data_dir: PathBuf::from("/tmp"),
            reconcile_interval_secs: 30,
            sweep_interval_secs: 300,
            providers: vec![provider.clone(), provider],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateProvider(_))
        ));
    }

    #[test]
    fn forwarded_environment_honors_prefix_and_reserved() {
        // SAFETY: test-local env mutation; tests touching these keys
        // run in this process only.
        unsafe {
            std::env::set_var("FWDTEST_TOKEN", "abc");
            std::env::set_var("CORRAL_FWDTEST_SECRET", "nope");
        }

        let external = ExternalConfig {
            environment_variables: vec!["FWDTEST_".to_string(), "CORRAL_".to_string()],
            ..Default::default()
        };
        let vars = external.forwarded_environment();

        assert!(vars.iter().any(|(k, v)| k == "FWDTEST_TOKEN" && v == "abc"));
        assert!(!vars.iter().any(|(k, _)| k == "CORRAL_FWDTEST_SECRET"));
    }
}
