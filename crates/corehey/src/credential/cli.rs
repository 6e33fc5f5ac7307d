//! CLI delegation tier.
//!
//! Shells out to an already authenticated `az` CLI:
//!
//! ```text
//! az keyvault secret show --vault-name <name> --name <secret> --query value -o tsv
//! ```

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{ResolvedSecret, SecretSource, TOKEN_SECRET_NAME, URL_SECRET_NAME};
use crate::config::{ResolverSettings, VaultConfig};
use crate::error::{CliFailure, CoreHeyError, Result};

/// Fetches secrets through the Azure CLI.
#[derive(Debug, Clone)]
pub struct AzCliSource {
    program: String,
    timeout: Duration,
}

impl AzCliSource {
    #[must_use]
    pub fn new(settings: &ResolverSettings) -> Self {
        Self {
            program: settings.cli_program.clone(),
            timeout: settings.cli_timeout,
        }
    }

    /// Fetch a single secret value, trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::CliUnavailable`] when the CLI is missing,
    /// exits unsuccessfully, times out or prints nothing.
    pub async fn fetch_secret(&self, vault_name: &str, secret: &str) -> Result<String> {
        let unavailable = |failure| CoreHeyError::CliUnavailable {
            secret: secret.to_string(),
            failure,
        };

        let program = which::which(&self.program).map_err(|_| {
            unavailable(CliFailure::NotInstalled {
                program: self.program.clone(),
            })
        })?;

        debug!(
            program = %program.display(),
            vault = vault_name,
            secret,
            "Fetching secret via CLI"
        );

        let child = Command::new(&program)
            .args(["keyvault", "secret", "show"])
            .args(["--vault-name", vault_name])
            .args(["--name", secret])
            .args(["--query", "value", "-o", "tsv"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(CliFailure::Spawn(e.to_string())))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(unavailable(CliFailure::Spawn(e.to_string()))),
            Err(_) => {
                return Err(unavailable(CliFailure::TimedOut {
                    secs: self.timeout.as_secs(),
                }))
            }
        };

        if !output.status.success() {
            return Err(unavailable(CliFailure::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(unavailable(CliFailure::EmptyOutput));
        }

        Ok(value)
    }
}

#[async_trait]
impl SecretSource for AzCliSource {
    fn name(&self) -> &'static str {
        "az-cli"
    }

    async fn fetch(&self, config: &VaultConfig) -> Result<ResolvedSecret> {
        let url = self.fetch_secret(&config.vault_name, URL_SECRET_NAME).await?;
        let token = self.fetch_secret(&config.vault_name, TOKEN_SECRET_NAME).await?;
        Ok(ResolvedSecret { url, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(program: &str, timeout: Duration) -> AzCliSource {
        AzCliSource::new(
            &ResolverSettings::default()
                .with_cli_program(program)
                .with_cli_timeout(timeout),
        )
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_installed() {
        let cli = source("corehey-definitely-not-a-real-cli", Duration::from_secs(1));

        let err = cli.fetch(&VaultConfig::default()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreHeyError::CliUnavailable {
                failure: CliFailure::NotInstalled { .. },
                ..
            }
        ));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("az");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_fetches_both_secrets_with_expected_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let az = script(
                dir.path(),
                r#"[ "$1 $2 $3 $4 $5 $6 $8 $9 ${10} ${11}" = "keyvault secret show --vault-name myVault --name --query value -o tsv" ] || exit 3
case "$7" in
  url-whatapp) printf '  https://api.example.com\n' ;;
  token-whatapp) printf 'tok-123\n\n' ;;
  *) exit 4 ;;
esac"#,
            );
            let cli = source(az.to_str().unwrap(), Duration::from_secs(5));
            let config = VaultConfig {
                vault_name: "myVault".to_string(),
                ..VaultConfig::default()
            };

            let secret = cli.fetch(&config).await.unwrap();
            assert_eq!(secret.url, "https://api.example.com");
            assert_eq!(secret.token, "tok-123");
        }

        #[tokio::test]
        async fn test_non_zero_exit_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let az = script(dir.path(), "echo \"Please run 'az login'\" >&2; exit 1");
            let cli = source(az.to_str().unwrap(), Duration::from_secs(5));

            let err = cli.fetch_secret("waSecrets", URL_SECRET_NAME).await.unwrap_err();
            match err {
                CoreHeyError::CliUnavailable { secret, failure } => {
                    assert_eq!(secret, URL_SECRET_NAME);
                    assert_eq!(
                        failure,
                        CliFailure::NonZeroExit {
                            code: Some(1),
                            stderr: "Please run 'az login'".to_string(),
                        }
                    );
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let az = script(dir.path(), "sleep 5");
            let cli = source(az.to_str().unwrap(), Duration::from_millis(200));

            let err = cli.fetch_secret("waSecrets", URL_SECRET_NAME).await.unwrap_err();
            assert!(matches!(
                err,
                CoreHeyError::CliUnavailable {
                    failure: CliFailure::TimedOut { .. },
                    ..
                }
            ));
        }

        #[tokio::test]
        async fn test_empty_output() {
            let dir = tempfile::tempdir().unwrap();
            let az = script(dir.path(), "printf '   \\n'");
            let cli = source(az.to_str().unwrap(), Duration::from_secs(5));

            let err = cli.fetch_secret("waSecrets", TOKEN_SECRET_NAME).await.unwrap_err();
            assert!(matches!(
                err,
                CoreHeyError::CliUnavailable {
                    failure: CliFailure::EmptyOutput,
                    ..
                }
            ));
        }
    }
}
