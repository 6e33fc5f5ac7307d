//! Error types for credential resolution and the native bridge.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::credential::CredentialTier;

/// Result alias used throughout the crate.
pub type Result<T, E = CoreHeyError> = std::result::Result<T, E>;

/// Errors surfaced by the bridge, the resolver and the facade.
#[derive(Debug, Error)]
pub enum CoreHeyError {
    /// The host OS has no known artifact naming scheme.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// No artifact file exists at any probed location.
    #[error("Shared library not found, probed: {}", display_paths(.probed))]
    LibraryNotFound { probed: Vec<PathBuf> },

    /// The OS loader rejected the artifact.
    #[error("Failed to load library {}: {reason}", .path.display())]
    LibraryLoadFailed { path: PathBuf, reason: String },

    /// A mandatory export is missing from the artifact.
    #[error("Required symbol `{symbol}` missing from {}", .path.display())]
    MissingRequiredSymbol { symbol: &'static str, path: PathBuf },

    /// An optional export was not bound at load time.
    #[error("{symbol} function not available in library")]
    FunctionNotAvailable { symbol: &'static str },

    /// Caller input rejected before crossing the native boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The CLI delegation tier could not produce a secret.
    #[error("CLI delegation unavailable for secret `{secret}`: {failure}")]
    CliUnavailable { secret: String, failure: CliFailure },

    /// Every credential tier was tried and failed.
    #[error("Credential resolution failed: {}", display_attempts(.attempts))]
    CredentialResolutionFailed { attempts: Vec<TierFailure> },

    /// Managed identity token acquisition or vault read failed.
    #[error("Managed identity failed: {0}")]
    ManagedIdentity(String),

    /// The native side returned something the bridge cannot decode.
    #[error("Native call `{symbol}` failed: {reason}")]
    NativeCallFailed { symbol: &'static str, reason: String },

    /// HTTP transport error while talking to the identity endpoint or vault.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Structured reason the CLI delegation tier was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliFailure {
    /// The executable could not be located.
    NotInstalled { program: String },
    /// The executable could not be started.
    Spawn(String),
    /// The process exited unsuccessfully.
    NonZeroExit { code: Option<i32>, stderr: String },
    /// The process did not finish within the allotted time.
    TimedOut { secs: u64 },
    /// The process succeeded but printed nothing.
    EmptyOutput,
}

impl fmt::Display for CliFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled { program } => write!(f, "`{program}` not found in PATH"),
            Self::Spawn(reason) => write!(f, "failed to spawn: {reason}"),
            Self::NonZeroExit { code, stderr } => {
                match code {
                    Some(code) => write!(f, "exited with status {code}")?,
                    None => write!(f, "terminated by signal")?,
                }
                if stderr.is_empty() {
                    Ok(())
                } else {
                    write!(f, ": {stderr}")
                }
            }
            Self::TimedOut { secs } => write!(f, "timed out after {secs}s"),
            Self::EmptyOutput => write!(f, "returned an empty value"),
        }
    }
}

/// One failed tier attempt recorded during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: CredentialTier,
    pub reason: String,
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tier, self.reason)
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_attempts(attempts: &[TierFailure]) -> String {
    if attempts.is_empty() {
        return "no tiers attempted".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failure_names_every_tier() {
        let err = CoreHeyError::CredentialResolutionFailed {
            attempts: vec![
                TierFailure {
                    tier: CredentialTier::CliDelegation,
                    reason: "`az` not found in PATH".to_string(),
                },
                TierFailure {
                    tier: CredentialTier::ManagedIdentity,
                    reason: "403 Forbidden".to_string(),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("cli_delegation: `az` not found in PATH"));
        assert!(message.contains("managed_identity: 403 Forbidden"));
    }

    #[test]
    fn test_cli_failure_display() {
        let failure = CliFailure::NonZeroExit {
            code: Some(1),
            stderr: "ERROR: Please run 'az login'".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "exited with status 1: ERROR: Please run 'az login'"
        );
        assert_eq!(
            CliFailure::TimedOut { secs: 10 }.to_string(),
            "timed out after 10s"
        );
    }

    #[test]
    fn test_library_not_found_lists_probed_paths() {
        let err = CoreHeyError::LibraryNotFound {
            probed: vec![
                PathBuf::from("/opt/lib/libcorehey_amd64.so"),
                PathBuf::from("/opt/lib/libcorehey.so"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Shared library not found, probed: /opt/lib/libcorehey_amd64.so, /opt/lib/libcorehey.so"
        );
    }
}
