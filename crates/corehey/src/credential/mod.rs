//! Tiered credential resolution for the Key Vault secrets.
//!
//! Every call walks the tiers from the top; nothing about which tier worked
//! last time is remembered.
//!
//! 1. **CLI delegation** - `az keyvault secret show` as a subprocess. Any
//!    failure falls through to the next tier.
//! 2. **Managed identity** - token from the platform identity endpoint, then
//!    the vault REST API. Failure here ends resolution.
//!
//! A [`VaultConfig`] that names its own vault with managed identity enabled
//! skips tier 1 and is reported as [`CredentialTier::ExplicitConfig`].

pub mod cli;
pub mod managed_identity;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{ResolverSettings, VaultConfig};
use crate::error::{CoreHeyError, Result, TierFailure};

pub use cli::AzCliSource;
pub use managed_identity::ManagedIdentitySource;

/// Secret holding the downstream API base URL.
pub const URL_SECRET_NAME: &str = "url-whatapp";

/// Secret holding the downstream API bearer token.
pub const TOKEN_SECRET_NAME: &str = "token-whatapp";

/// Authentication mechanisms, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CredentialTier {
    CliDelegation,
    ManagedIdentity,
    ExplicitConfig,
}

impl CredentialTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CliDelegation => "cli_delegation",
            Self::ManagedIdentity => "managed_identity",
            Self::ExplicitConfig => "explicit_config",
        }
    }
}

impl fmt::Display for CredentialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two secrets fetched for one facade call. Never cached.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub url: String,
    pub token: String,
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("url", &format_args!("<{} bytes>", self.url.len()))
            .field("token", &format_args!("<redacted>"))
            .finish()
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub secret: ResolvedSecret,
    pub tier: CredentialTier,
}

/// One way of obtaining the secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch `url-whatapp` and `token-whatapp`.
    async fn fetch(&self, config: &VaultConfig) -> Result<ResolvedSecret>;
}

/// Walks the credential tiers in order.
#[derive(Clone)]
pub struct CredentialResolver {
    cli: Arc<dyn SecretSource>,
    managed_identity: Arc<dyn SecretSource>,
}

impl CredentialResolver {
    /// Resolver backed by the `az` CLI and the platform identity endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::Http`] if the HTTP client cannot be created.
    pub fn new(settings: &ResolverSettings) -> Result<Self> {
        Ok(Self::with_sources(
            Arc::new(AzCliSource::new(settings)),
            Arc::new(ManagedIdentitySource::new(settings)?),
        ))
    }

    /// Resolver with substituted tiers.
    #[must_use]
    pub fn with_sources(
        cli: Arc<dyn SecretSource>,
        managed_identity: Arc<dyn SecretSource>,
    ) -> Self {
        Self {
            cli,
            managed_identity,
        }
    }

    /// Resolve, skipping CLI delegation for an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::CredentialResolutionFailed`] listing every
    /// attempted tier.
    pub async fn resolve(&self, config: &VaultConfig) -> Result<Resolution> {
        if config.is_explicit() {
            return self.resolve_explicit(config).await;
        }
        self.resolve_tiered(config).await
    }

    /// Resolve starting at CLI delegation regardless of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::CredentialResolutionFailed`] listing every
    /// attempted tier.
    pub async fn resolve_tiered(&self, config: &VaultConfig) -> Result<Resolution> {
        let mut attempts = Vec::with_capacity(2);

        match self.cli.fetch(config).await {
            Ok(secret) => return Ok(resolved(secret, CredentialTier::CliDelegation)),
            Err(e) => {
                warn!(
                    source = self.cli.name(),
                    error = %e,
                    "CLI delegation unavailable, falling back to managed identity"
                );
                attempts.push(TierFailure {
                    tier: CredentialTier::CliDelegation,
                    reason: e.to_string(),
                });
            }
        }

        if !config.use_managed_identity {
            attempts.push(TierFailure {
                tier: CredentialTier::ManagedIdentity,
                reason: "disabled by configuration (use_managed_identity = false)".to_string(),
            });
            return Err(CoreHeyError::CredentialResolutionFailed { attempts });
        }

        match self.managed_identity.fetch(config).await {
            Ok(secret) => Ok(resolved(secret, CredentialTier::ManagedIdentity)),
            Err(e) => {
                attempts.push(TierFailure {
                    tier: CredentialTier::ManagedIdentity,
                    reason: e.to_string(),
                });
                Err(CoreHeyError::CredentialResolutionFailed { attempts })
            }
        }
    }

    async fn resolve_explicit(&self, config: &VaultConfig) -> Result<Resolution> {
        match self.managed_identity.fetch(config).await {
            Ok(secret) => Ok(resolved(secret, CredentialTier::ExplicitConfig)),
            Err(e) => Err(CoreHeyError::CredentialResolutionFailed {
                attempts: vec![TierFailure {
                    tier: CredentialTier::ExplicitConfig,
                    reason: e.to_string(),
                }],
            }),
        }
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("cli", &self.cli.name())
            .field("managed_identity", &self.managed_identity.name())
            .finish()
    }
}

fn resolved(secret: ResolvedSecret, tier: CredentialTier) -> Resolution {
    info!(tier = %tier, "Resolved Key Vault secrets");
    Resolution { secret, tier }
}
