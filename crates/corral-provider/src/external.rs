//! Subprocess runner for external providers.
//!
//! An external provider is an executable invoked once per operation.
//! The operation is named in `CORRAL_COMMAND`, provider-specific
//! configuration is pointed at by `CORRAL_PROVIDER_CONFIG`, and the
//! versioned parameter payload arrives as JSON on stdin. Results come
//! back as JSON on stdout; failures as a non-zero exit with a message
//! on stderr.
//!
//! Exit codes: `0` success, `NOT_FOUND_EXIT_CODE` means the addressed
//! instance does not exist at the provider, anything else is a
//! permanent failure. Spawn errors and deadline overruns are transient.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use corral_core::config::ProviderConfig;
use corral_core::types::InterfaceVersion;

use crate::error::{ProviderError, ProviderResult};

/// Exit code an external provider uses to signal "no such instance".
pub const NOT_FOUND_EXIT_CODE: i32 = 2;

/// Default per-operation deadline for the subprocess.
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Executes one external provider binary per operation.
///
/// The child gets a scrubbed environment: only the allow-listed host
/// variables (matched by configured prefix, never the controller's own
/// reserved prefix) plus the `CORRAL_*` variables the contract defines.
#[derive(Debug, Clone)]
pub struct ExternalRunner {
    executable: PathBuf,
    config_file: Option<PathBuf>,
    forwarded_env: Vec<(String, String)>,
    interface_version: InterfaceVersion,
    exec_timeout: Duration,
}

impl ExternalRunner {
    pub fn from_config(config: &ProviderConfig) -> ProviderResult<Self> {
        let executable = config.external.executable_path(&config.name)?;
        Ok(Self {
            executable,
            config_file: config.external.config_file.clone(),
            forwarded_env: config.external.forwarded_environment(),
            interface_version: config.interface_version,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        })
    }

    /// Override the per-operation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn interface_version(&self) -> InterfaceVersion {
        self.interface_version
    }

    /// Run one provider operation. Returns raw stdout on success.
    pub async fn exec(
        &self,
        command: &str,
        extra_env: &[(String, String)],
        payload: Option<Vec<u8>>,
    ) -> ProviderResult<Vec<u8>> {
        let mut cmd = Command::new(&self.executable);
        cmd.env_clear()
            .envs(self.forwarded_env.iter().cloned())
            .env("CORRAL_COMMAND", command)
            .env("CORRAL_INTERFACE_VERSION", self.interface_version.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(config_file) = &self.config_file {
            cmd.env("CORRAL_PROVIDER_CONFIG", config_file);
        }
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        debug!(executable = ?self.executable, command, "invoking external provider");

        let mut child = cmd
            .spawn()
            .map_err(|e| ProviderError::Transient(format!("failed to spawn provider: {e}")))?;

        if let Some(payload) = payload {
            // stdin was requested piped above.
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await.map_err(|e| {
                    ProviderError::Transient(format!("failed to write provider payload: {e}"))
                })?;
            }
        } else {
            drop(child.stdin.take());
        }

        let output = tokio::time::timeout(self.exec_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(executable = ?self.executable, command, "provider call timed out");
                ProviderError::Transient(format!(
                    "provider {command} timed out after {:?}",
                    self.exec_timeout
                ))
            })?
            .map_err(|e| ProviderError::Transient(format!("provider wait failed: {e}")))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim().to_string();
        match output.status.code() {
            Some(NOT_FOUND_EXIT_CODE) => Err(ProviderError::NotFound(message)),
            _ => Err(ProviderError::Permanent(format!(
                "provider {command} exited with {}: {message}",
                output.status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    use corral_core::config::ExternalConfig;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("provider.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn runner_for(path: PathBuf) -> ExternalRunner {
        let config = ProviderConfig {
            name: "test".to_string(),
            description: String::new(),
            interface_version: InterfaceVersion::default(),
            external: ExternalConfig {
                provider_executable: Some(path),
                ..Default::default()
            },
        };
        ExternalRunner::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(script(dir.path(), r#"echo '{"ok":true}'"#));

        let out = runner.exec("ListInstances", &[], None).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn not_found_exit_code_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(script(
            dir.path(),
            "echo 'no such instance' >&2\nexit 2",
        ));

        let err = runner.exec("GetInstance", &[], None).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_permanent_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_for(script(dir.path(), "echo 'quota exceeded' >&2\nexit 1"));

        let err = runner.exec("CreateInstance", &[], None).await.unwrap_err();
        match err {
            ProviderError::Permanent(msg) => assert!(msg.contains("quota exceeded")),
            other => panic!("expected permanent error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_and_payload_reach_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        // Echo back the command name and stdin so we can assert both.
        let runner = runner_for(script(
            dir.path(),
            r#"printf '%s:' "$CORRAL_COMMAND"; cat"#,
        ));

        let out = runner
            .exec("CreateInstance", &[], Some(b"{\"name\":\"x\"}".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "CreateInstance:{\"name\":\"x\"}"
        );
    }

    #[tokio::test]
    async fn reserved_env_is_not_forwarded_but_contract_env_is() {
        // SAFETY: test-local env mutation.
        unsafe {
            std::env::set_var("EXTTEST_REGION", "us-east-1");
            std::env::set_var("CORRAL_EXTTEST_SECRET", "sekrit");
        }

        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            r#"printf '%s|%s|%s' "$EXTTEST_REGION" "$CORRAL_EXTTEST_SECRET" "$CORRAL_INTERFACE_VERSION""#,
        );
        let config = ProviderConfig {
            name: "test".to_string(),
            description: String::new(),
            interface_version: InterfaceVersion::V0_1_1,
            external: ExternalConfig {
                provider_executable: Some(path),
                environment_variables: vec!["EXTTEST_".to_string(), "CORRAL_".to_string()],
                ..Default::default()
            },
        };
        let runner = ExternalRunner::from_config(&config).unwrap();

        let out = runner.exec("GetInstance", &[], None).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "us-east-1||v0.1.1");
    }

    #[tokio::test]
    async fn slow_binary_times_out_as_transient() {
        let dir = tempfile::tempdir().unwrap();
        let runner =
            runner_for(script(dir.path(), "sleep 5")).with_timeout(Duration::from_millis(100));

        let err = runner.exec("CreateInstance", &[], None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
