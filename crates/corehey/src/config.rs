//! Vault configuration and resolver settings.
//!
//! Effective values follow a fixed precedence: explicit argument, then
//! environment variable, then compiled-in default.
//!
//! | Field | Environment variable | Default |
//! |---|---|---|
//! | `vault_url` | `AZURE_KEY_VAULT_URL` | derived from `vault_name` |
//! | `client_id` | `AZURE_CLIENT_ID` | none (system-assigned identity) |
//! | `vault_name` | `AZURE_KEY_VAULT_NAME` | `waSecrets` |
//! | `use_managed_identity` | - | `true` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Vault used when nothing else is configured.
pub const DEFAULT_VAULT_NAME: &str = "waSecrets";

pub const ENV_KEY_VAULT_URL: &str = "AZURE_KEY_VAULT_URL";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_KEY_VAULT_NAME: &str = "AZURE_KEY_VAULT_NAME";

/// Where the vault lives and which identity reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Key Vault endpoint, e.g. `https://my-vault.vault.azure.net`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_url: Option<String>,

    /// Use the ambient platform identity for tier 2.
    #[serde(default = "default_use_managed_identity")]
    pub use_managed_identity: bool,

    /// User-assigned identity; `None` selects the system-assigned identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Vault name passed to the CLI tier.
    #[serde(default = "default_vault_name")]
    pub vault_name: String,
}

fn default_use_managed_identity() -> bool {
    true
}

fn default_vault_name() -> String {
    DEFAULT_VAULT_NAME.to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            vault_url: None,
            use_managed_identity: default_use_managed_identity(),
            client_id: None,
            vault_name: default_vault_name(),
        }
    }
}

impl VaultConfig {
    /// Parse the dictionary shape `{"vault_url": ..., "use_managed_identity": ..., "client_id": ...}`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreHeyError::Serialization`] on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Endpoint used for REST reads: `vault_url`, or one derived from `vault_name`.
    #[must_use]
    pub fn effective_vault_url(&self) -> String {
        match self.vault_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => vault_url_for(&self.vault_name),
        }
    }

    /// Fully specified: managed identity against a caller-chosen vault.
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        if !self.use_managed_identity {
            return false;
        }
        self.vault_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .is_some_and(|url| !url.eq_ignore_ascii_case(&vault_url_for(DEFAULT_VAULT_NAME)))
    }

    /// JSON handed to native exports that resolve secrets themselves.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreHeyError::Serialization`] if encoding fails.
    pub fn native_payload(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Payload<'a> {
            vault_url: &'a str,
        }

        let vault_url = self.effective_vault_url();
        Ok(serde_json::to_string(&Payload {
            vault_url: &vault_url,
        })?)
    }
}

/// `https://<name>.vault.azure.net`
#[must_use]
pub fn vault_url_for(vault_name: &str) -> String {
    format!("https://{vault_name}.vault.azure.net")
}

/// Managed identity configuration for a specific vault.
#[must_use]
pub fn create_azure_config(vault_url: &str, client_id: Option<&str>) -> VaultConfig {
    VaultConfig {
        vault_url: Some(vault_url.to_string()),
        use_managed_identity: true,
        client_id: client_id.map(str::to_string),
        vault_name: DEFAULT_VAULT_NAME.to_string(),
    }
}

/// Assembles a [`VaultConfig`] from arguments, environment and defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    vault_url: Option<String>,
    client_id: Option<String>,
    vault_name: Option<String>,
    use_managed_identity: Option<bool>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn vault_url(mut self, vault_url: impl Into<String>) -> Self {
        self.vault_url = Some(vault_url.into());
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn vault_name(mut self, vault_name: impl Into<String>) -> Self {
        self.vault_name = Some(vault_name.into());
        self
    }

    #[must_use]
    pub fn use_managed_identity(mut self, enabled: bool) -> Self {
        self.use_managed_identity = Some(enabled);
        self
    }

    /// Whether the caller supplied the vault URL directly.
    #[must_use]
    pub fn has_explicit_vault_url(&self) -> bool {
        self.vault_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Build against the process environment.
    #[must_use]
    pub fn build(self) -> VaultConfig {
        self.build_with(|key| std::env::var(key).ok())
    }

    /// Build against an arbitrary environment lookup.
    #[must_use]
    pub fn build_with<F>(self, lookup: F) -> VaultConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let arg = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        VaultConfig {
            vault_url: arg(self.vault_url).or_else(|| env(ENV_KEY_VAULT_URL)),
            use_managed_identity: self
                .use_managed_identity
                .unwrap_or_else(default_use_managed_identity),
            client_id: arg(self.client_id).or_else(|| env(ENV_CLIENT_ID)),
            vault_name: arg(self.vault_name)
                .or_else(|| env(ENV_KEY_VAULT_NAME))
                .unwrap_or_else(default_vault_name),
        }
    }
}

/// Timeouts and endpoints used by the credential tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Program used for CLI delegation.
    pub cli_program: String,
    /// Upper bound for each CLI secret fetch.
    pub cli_timeout: Duration,
    /// Upper bound for each HTTP request in the managed identity tier.
    pub request_timeout: Duration,
    /// Instance metadata token endpoint.
    pub imds_endpoint: String,
    /// Key Vault REST API version.
    pub key_vault_api_version: String,
}

pub const DEFAULT_CLI_PROGRAM: &str = "az";
pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
pub const DEFAULT_KEY_VAULT_API_VERSION: &str = "7.4";

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cli_program: DEFAULT_CLI_PROGRAM.to_string(),
            cli_timeout: DEFAULT_CLI_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            imds_endpoint: DEFAULT_IMDS_ENDPOINT.to_string(),
            key_vault_api_version: DEFAULT_KEY_VAULT_API_VERSION.to_string(),
        }
    }
}

impl ResolverSettings {
    #[must_use]
    pub fn with_cli_program(mut self, program: impl Into<String>) -> Self {
        self.cli_program = program.into();
        self
    }

    #[must_use]
    pub fn with_cli_timeout(mut self, timeout: Duration) -> Self {
        self.cli_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_imds_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.imds_endpoint = endpoint.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConfigBuilder::new().build_with(env(&[]));

        assert_eq!(config, VaultConfig::default());
        assert_eq!(config.vault_name, "waSecrets");
        assert!(config.use_managed_identity);
        assert!(config.client_id.is_none());
        assert_eq!(config.effective_vault_url(), "https://waSecrets.vault.azure.net");
    }

    #[test]
    fn test_argument_beats_environment() {
        let lookup = env(&[
            (ENV_KEY_VAULT_URL, "https://env.vault.azure.net"),
            (ENV_CLIENT_ID, "env-client"),
            (ENV_KEY_VAULT_NAME, "envVault"),
        ]);

        let config = ConfigBuilder::new()
            .vault_url("https://arg.vault.azure.net/")
            .client_id("arg-client")
            .build_with(&lookup);
        assert_eq!(config.vault_url.as_deref(), Some("https://arg.vault.azure.net/"));
        assert_eq!(config.effective_vault_url(), "https://arg.vault.azure.net");
        assert_eq!(config.client_id.as_deref(), Some("arg-client"));
        assert_eq!(config.vault_name, "envVault");

        let config = ConfigBuilder::new().build_with(&lookup);
        assert_eq!(config.vault_url.as_deref(), Some("https://env.vault.azure.net"));
        assert_eq!(config.client_id.as_deref(), Some("env-client"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = ConfigBuilder::new()
            .vault_url("")
            .build_with(env(&[(ENV_CLIENT_ID, "  ")]));
        assert!(config.vault_url.is_none());
        assert!(config.client_id.is_none());
    }

    #[test]
    fn test_is_explicit() {
        assert!(create_azure_config("https://v.vault.azure.net", None).is_explicit());
        assert!(!create_azure_config("https://wasecrets.vault.azure.net/", None).is_explicit());
        assert!(!VaultConfig::default().is_explicit());

        let mut legacy = create_azure_config("https://v.vault.azure.net", None);
        legacy.use_managed_identity = false;
        assert!(!legacy.is_explicit());
    }

    #[test]
    fn test_from_json_dictionary_shape() {
        let config = VaultConfig::from_json(
            r#"{"vault_url": "https://prod.vault.azure.net/", "use_managed_identity": true,
                "client_id": "12345678-1234-5678-9012-123456789abc"}"#,
        )
        .unwrap();
        assert_eq!(config.vault_name, DEFAULT_VAULT_NAME);
        assert!(config.is_explicit());

        let dev = VaultConfig::from_json(r#"{"use_managed_identity": true}"#).unwrap();
        assert_eq!(dev, VaultConfig::default());

        assert!(VaultConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_native_payload() {
        let config = create_azure_config("https://v.vault.azure.net/", Some("cid"));
        assert_eq!(
            config.native_payload().unwrap(),
            r#"{"vault_url":"https://v.vault.azure.net"}"#
        );
    }

    #[test]
    #[serial]
    fn test_build_reads_process_environment() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var(ENV_KEY_VAULT_NAME, "fromEnv");
            std::env::remove_var(ENV_KEY_VAULT_URL);
            std::env::remove_var(ENV_CLIENT_ID);
        }

        let config = ConfigBuilder::new().build();
        assert_eq!(config.vault_name, "fromEnv");
        assert_eq!(config.effective_vault_url(), "https://fromEnv.vault.azure.net");

        unsafe {
            std::env::remove_var(ENV_KEY_VAULT_NAME);
        }
    }
}
