//! Business-level entry points.
//!
//! Each call builds its effective configuration, resolves credentials and
//! then invokes the native core, in that order. Nothing is cached between
//! calls except the loaded library itself.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigBuilder, ResolverSettings, VaultConfig};
use crate::credential::{CredentialResolver, Resolution};
use crate::error::{CoreHeyError, Result};
use crate::native::descriptor::{GET_QUICK_REPLIES, GET_TYPIFICATION};
use crate::native::{LibraryLoader, NativeBridge, NativeFunctionDescriptor};

pub use crate::config::create_azure_config;

type TextCall = fn(&NativeBridge, &str, &str, &str) -> Result<String>;

/// What the first string argument of a business export carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallConvention {
    /// Resolve credentials here and pass the downstream token.
    #[default]
    Hybrid,
    /// Pass the vault configuration as JSON and let the native core resolve.
    NativeVault,
}

/// How the effective configuration selects the starting tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// Caller supplied a configuration; an explicit one skips CLI delegation.
    Configured,
    /// Always start at CLI delegation.
    Tiered,
}

/// Facade over the credential resolver and the native bridge.
#[derive(Debug, Clone)]
pub struct CoreHey {
    loader: Arc<LibraryLoader>,
    resolver: CredentialResolver,
    convention: CallConvention,
}

impl CoreHey {
    #[must_use]
    pub fn new(loader: Arc<LibraryLoader>, resolver: CredentialResolver) -> Self {
        Self {
            loader,
            resolver,
            convention: CallConvention::default(),
        }
    }

    /// Facade for the host platform with default resolver settings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::UnsupportedPlatform`] on unknown hosts or
    /// [`CoreHeyError::Http`] if the HTTP client cannot be built.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            Arc::new(LibraryLoader::from_env()?),
            CredentialResolver::new(&ResolverSettings::default())?,
        ))
    }

    #[must_use]
    pub fn with_convention(mut self, convention: CallConvention) -> Self {
        self.convention = convention;
        self
    }

    #[must_use]
    pub fn convention(&self) -> CallConvention {
        self.convention
    }

    #[must_use]
    pub fn loader(&self) -> &Arc<LibraryLoader> {
        &self.loader
    }

    /// Quick replies using a caller-built configuration.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_quick_replies(
        &self,
        config: &VaultConfig,
        org: &str,
        group: &str,
    ) -> Result<String> {
        self.invoke(
            &GET_QUICK_REPLIES,
            NativeBridge::get_quick_replies,
            config,
            Entry::Configured,
            org,
            group,
        )
        .await
    }

    /// Typification using a caller-built configuration.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_typification(
        &self,
        config: &VaultConfig,
        org: &str,
        group: &str,
    ) -> Result<String> {
        self.invoke(
            &GET_TYPIFICATION,
            NativeBridge::get_typification,
            config,
            Entry::Configured,
            org,
            group,
        )
        .await
    }

    /// Quick replies with optional overrides layered over the environment.
    ///
    /// CLI delegation is skipped only when `vault_url` is passed here.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_quick_replies_simple(
        &self,
        org: &str,
        group: &str,
        vault_url: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<String> {
        let (config, entry) = simple_config(vault_url, client_id);
        self.invoke(
            &GET_QUICK_REPLIES,
            NativeBridge::get_quick_replies,
            &config,
            entry,
            org,
            group,
        )
        .await
    }

    /// Typification with optional overrides layered over the environment.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_typification_simple(
        &self,
        org: &str,
        group: &str,
        vault_url: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<String> {
        let (config, entry) = simple_config(vault_url, client_id);
        self.invoke(
            &GET_TYPIFICATION,
            NativeBridge::get_typification,
            &config,
            entry,
            org,
            group,
        )
        .await
    }

    /// Quick replies with everything taken from the environment.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_quick_replies_ultra_simple(&self, org: &str, group: &str) -> Result<String> {
        let config = ConfigBuilder::new().build();
        self.invoke(
            &GET_QUICK_REPLIES,
            NativeBridge::get_quick_replies,
            &config,
            Entry::Tiered,
            org,
            group,
        )
        .await
    }

    /// Typification with everything taken from the environment.
    ///
    /// # Errors
    ///
    /// Credential, loader and native call errors, see [`CoreHeyError`].
    pub async fn get_typification_ultra_simple(&self, org: &str, group: &str) -> Result<String> {
        let config = ConfigBuilder::new().build();
        self.invoke(
            &GET_TYPIFICATION,
            NativeBridge::get_typification,
            &config,
            Entry::Tiered,
            org,
            group,
        )
        .await
    }

    /// Legacy direct-token path: `token` is passed through unchanged.
    ///
    /// # Errors
    ///
    /// Loader and native call errors, see [`CoreHeyError`].
    pub async fn get_quick_replies_with_token(
        &self,
        token: &str,
        org: &str,
        group: &str,
    ) -> Result<String> {
        self.call_text(&GET_QUICK_REPLIES, NativeBridge::get_quick_replies, token, org, group)
            .await
    }

    /// Legacy direct-token path: `token` is passed through unchanged.
    ///
    /// # Errors
    ///
    /// Loader and native call errors, see [`CoreHeyError`].
    pub async fn get_typification_with_token(
        &self,
        token: &str,
        org: &str,
        group: &str,
    ) -> Result<String> {
        self.call_text(&GET_TYPIFICATION, NativeBridge::get_typification, token, org, group)
            .await
    }

    /// Resolve the secrets without calling the native core.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::CredentialResolutionFailed`].
    pub async fn resolve_secrets(&self, config: &VaultConfig) -> Result<Resolution> {
        self.resolver.resolve(config).await
    }

    /// # Errors
    ///
    /// Loader errors or [`CoreHeyError::FunctionNotAvailable`].
    pub fn add_numbers(&self, a: i32, b: i32) -> Result<i32> {
        self.loader.load()?.add(a, b)
    }

    /// # Errors
    ///
    /// Loader errors or [`CoreHeyError::FunctionNotAvailable`].
    pub fn multiply_numbers(&self, a: i32, b: i32) -> Result<i32> {
        self.loader.load()?.multiply(a, b)
    }

    /// The `n`th Fibonacci number.
    ///
    /// # Errors
    ///
    /// [`CoreHeyError::InvalidArgument`] for negative `n`, checked before the
    /// library is loaded.
    pub fn get_fibonacci(&self, n: i32) -> Result<i32> {
        if n < 0 {
            return Err(CoreHeyError::InvalidArgument(format!(
                "Fibonacci index must be non-negative, got {n}"
            )));
        }
        self.loader.load()?.fibonacci(n)
    }

    /// # Errors
    ///
    /// [`CoreHeyError::InvalidArgument`] for `n < 2`, checked before the
    /// library is loaded.
    pub fn is_prime(&self, n: i32) -> Result<bool> {
        if n < 2 {
            return Err(CoreHeyError::InvalidArgument(format!(
                "primality is defined for n >= 2, got {n}"
            )));
        }
        self.loader.load()?.is_prime(n)
    }

    async fn invoke(
        &self,
        descriptor: &'static NativeFunctionDescriptor,
        call: TextCall,
        config: &VaultConfig,
        entry: Entry,
        org: &str,
        group: &str,
    ) -> Result<String> {
        reject_nul("org", org)?;
        reject_nul("group", group)?;

        let first_arg = match self.convention {
            CallConvention::Hybrid => {
                let resolution = match entry {
                    Entry::Configured => self.resolver.resolve(config).await?,
                    Entry::Tiered => self.resolver.resolve_tiered(config).await?,
                };
                info!(
                    symbol = descriptor.symbol,
                    tier = %resolution.tier,
                    org,
                    group,
                    "Calling native core"
                );
                resolution.secret.token
            }
            CallConvention::NativeVault => {
                debug!(
                    symbol = descriptor.symbol,
                    vault = %config.effective_vault_url(),
                    "Delegating secret resolution to native core"
                );
                config.native_payload()?
            }
        };

        self.call_text(descriptor, call, &first_arg, org, group).await
    }

    async fn call_text(
        &self,
        descriptor: &'static NativeFunctionDescriptor,
        call: TextCall,
        first: &str,
        org: &str,
        group: &str,
    ) -> Result<String> {
        let loader = Arc::clone(&self.loader);
        let (first, org, group) = (first.to_string(), org.to_string(), group.to_string());

        // The native core performs blocking network I/O.
        tokio::task::spawn_blocking(move || {
            let bridge = loader.load()?;
            call(bridge.as_ref(), &first, &org, &group)
        })
        .await
        .map_err(|e| CoreHeyError::NativeCallFailed {
            symbol: descriptor.symbol,
            reason: e.to_string(),
        })?
    }
}

fn simple_config(vault_url: Option<&str>, client_id: Option<&str>) -> (VaultConfig, Entry) {
    let mut builder = ConfigBuilder::new();
    if let Some(url) = vault_url {
        builder = builder.vault_url(url);
    }
    if let Some(id) = client_id {
        builder = builder.client_id(id);
    }

    let entry = if builder.has_explicit_vault_url() {
        Entry::Configured
    } else {
        Entry::Tiered
    };
    (builder.build(), entry)
}

fn reject_nul(name: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(CoreHeyError::InvalidArgument(format!(
            "{name} contains an embedded NUL byte"
        )));
    }
    Ok(())
}
