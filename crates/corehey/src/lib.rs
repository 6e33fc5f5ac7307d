//! Credential resolution and bindings for the `CoreHey` native library.
//!
//! The native core fetches quick replies and typifications from a downstream
//! API. This crate decides how to obtain that API's credentials from Azure
//! Key Vault and calls into the precompiled library with them.
//!
//! # Usage
//!
//! ```no_run
//! use corehey::{create_azure_config, CoreHey};
//!
//! # async fn run() -> corehey::Result<()> {
//! let corehey = CoreHey::from_env()?;
//!
//! // Everything from the environment, CLI delegation first.
//! let replies = corehey.get_quick_replies_ultra_simple("org123", "group456").await?;
//!
//! // Managed identity against a specific vault.
//! let config = create_azure_config("https://my-vault.vault.azure.net", None);
//! let typification = corehey.get_typification(&config, "org123", "group456").await?;
//! # let _ = (replies, typification);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! - `AZURE_KEY_VAULT_URL`: vault endpoint for the managed identity tier
//! - `AZURE_CLIENT_ID`: user-assigned identity (system-assigned when unset)
//! - `AZURE_KEY_VAULT_NAME`: vault name for CLI delegation (default `waSecrets`)
//! - `COREHEY_LIBRARY_DIR`: directory holding the native artifact
//!
//! # Architecture
//!
//! - [`credential::CredentialResolver`] tries CLI delegation, then managed identity
//! - [`native::LibraryLoader`] loads the artifact once and binds its exports
//! - [`CoreHey`] composes the two for each business call

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credential;
pub mod error;
pub mod facade;
pub mod native;
pub mod platform;

pub use config::{create_azure_config, ConfigBuilder, ResolverSettings, VaultConfig};
pub use credential::{
    CredentialResolver, CredentialTier, Resolution, ResolvedSecret, SecretSource,
};
pub use error::{CliFailure, CoreHeyError, Result, TierFailure};
pub use facade::{CallConvention, CoreHey};
pub use native::{LibraryLoader, NativeBridge, SymbolTable};
pub use platform::{Platform, PlatformResolver};
