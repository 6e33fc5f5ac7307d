//! Managed identity tier: token from the platform identity endpoint, then
//! secret reads against the Key Vault REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{ResolvedSecret, SecretSource, TOKEN_SECRET_NAME, URL_SECRET_NAME};
use crate::config::{ResolverSettings, VaultConfig};
use crate::error::{CoreHeyError, Result};

/// Token audience for Key Vault.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

pub const ENV_IDENTITY_ENDPOINT: &str = "IDENTITY_ENDPOINT";
pub const ENV_IDENTITY_HEADER: &str = "IDENTITY_HEADER";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Where access tokens come from.
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityEndpoint {
    /// Instance metadata service, reachable from VMs and AKS nodes.
    Imds { url: String },
    /// App Service / Functions local identity endpoint.
    AppService { url: String, header: String },
}

impl IdentityEndpoint {
    /// App Service endpoint when both variables are set, IMDS otherwise.
    #[must_use]
    pub fn detect(imds_url: &str) -> Self {
        Self::detect_with(imds_url, |key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn detect_with<F>(imds_url: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());
        match (var(ENV_IDENTITY_ENDPOINT), var(ENV_IDENTITY_HEADER)) {
            (Some(url), Some(header)) => Self::AppService { url, header },
            _ => Self::Imds {
                url: imds_url.to_string(),
            },
        }
    }

    fn url(&self) -> &str {
        match self {
            Self::Imds { url } | Self::AppService { url, .. } => url,
        }
    }
}

impl std::fmt::Debug for IdentityEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imds { url } => f.debug_struct("Imds").field("url", url).finish(),
            Self::AppService { url, .. } => f
                .debug_struct("AppService")
                .field("url", url)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Reads secrets with the ambient managed identity.
#[derive(Debug, Clone)]
pub struct ManagedIdentitySource {
    http: reqwest::Client,
    identity_http: reqwest::Client,
    endpoint: IdentityEndpoint,
    api_version: String,
}

impl ManagedIdentitySource {
    /// # Errors
    ///
    /// Returns [`CoreHeyError::Http`] if the HTTP client cannot be built.
    pub fn new(settings: &ResolverSettings) -> Result<Self> {
        let endpoint = IdentityEndpoint::detect(&settings.imds_endpoint);
        Self::with_endpoint(settings, endpoint)
    }

    /// Source using a fixed identity endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::Http`] if the HTTP client cannot be built.
    pub fn with_endpoint(settings: &ResolverSettings, endpoint: IdentityEndpoint) -> Result<Self> {
        let http = client_builder(settings).build()?;

        // The link-local metadata service is never reachable through a proxy.
        let identity_http = match endpoint {
            IdentityEndpoint::Imds { .. } => client_builder(settings).no_proxy().build()?,
            IdentityEndpoint::AppService { .. } => http.clone(),
        };

        Ok(Self {
            http,
            identity_http,
            endpoint,
            api_version: settings.key_vault_api_version.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &IdentityEndpoint {
        &self.endpoint
    }

    /// Acquire a Key Vault access token.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::ManagedIdentity`] when the endpoint refuses,
    /// or [`CoreHeyError::Http`] when it cannot be reached.
    pub async fn acquire_token(&self, client_id: Option<&str>) -> Result<String> {
        let mut query: Vec<(&str, &str)> = vec![("resource", KEY_VAULT_RESOURCE)];
        let request = match &self.endpoint {
            IdentityEndpoint::Imds { url } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.identity_http.get(url).header("Metadata", "true")
            }
            IdentityEndpoint::AppService { url, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.identity_http.get(url).header("X-IDENTITY-HEADER", header)
            }
        };
        if let Some(client_id) = client_id.filter(|id| !id.is_empty()) {
            query.push(("client_id", client_id));
        }

        debug!(
            endpoint = self.endpoint.url(),
            user_assigned = client_id.is_some(),
            "Requesting managed identity token"
        );

        let resp = request.query(&query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreHeyError::ManagedIdentity(format!(
                "identity endpoint returned {status}: {}",
                body.trim()
            )));
        }

        let token: TokenResponse = resp.json().await?;
        if token.access_token.is_empty() {
            return Err(CoreHeyError::ManagedIdentity(
                "identity endpoint returned an empty access token".to_string(),
            ));
        }
        Ok(token.access_token)
    }

    /// Read one secret's current value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::ManagedIdentity`] for authorization failures,
    /// missing secrets and other non-success statuses.
    pub async fn get_secret(&self, vault_url: &str, token: &str, name: &str) -> Result<String> {
        let url = format!("{}/secrets/{name}", vault_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => {
                let bundle: SecretBundle = resp.json().await?;
                bundle.value.filter(|v| !v.is_empty()).ok_or_else(|| {
                    CoreHeyError::ManagedIdentity(format!("secret '{name}' has no value"))
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(CoreHeyError::ManagedIdentity(format!(
                    "access to secret '{name}' denied (check the identity's vault permissions)"
                )))
            }
            StatusCode::NOT_FOUND => Err(CoreHeyError::ManagedIdentity(format!(
                "secret '{name}' not found in {vault_url}"
            ))),
            status => Err(CoreHeyError::ManagedIdentity(format!(
                "vault returned {status} for secret '{name}'"
            ))),
        }
    }
}

fn client_builder(settings: &ResolverSettings) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(format!("corehey/{}", env!("CARGO_PKG_VERSION")))
        .timeout(settings.request_timeout)
}

#[async_trait]
impl SecretSource for ManagedIdentitySource {
    fn name(&self) -> &'static str {
        "managed-identity"
    }

    async fn fetch(&self, config: &VaultConfig) -> Result<ResolvedSecret> {
        let vault_url = config.effective_vault_url();
        let access_token = self.acquire_token(config.client_id.as_deref()).await?;

        let url = self.get_secret(&vault_url, &access_token, URL_SECRET_NAME).await?;
        let token = self.get_secret(&vault_url, &access_token, TOKEN_SECRET_NAME).await?;
        Ok(ResolvedSecret { url, token })
    }
}
