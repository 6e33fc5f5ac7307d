//! Host platform detection and native artifact naming.
//!
//! The native core ships as one shared library per platform:
//!
//! - macOS: `libcorehey.dylib`
//! - Linux: `libcorehey_amd64.so` / `libcorehey_arm64.so`, or plain `libcorehey.so`
//! - Windows: `libcorehey.dll`
//!
//! Before the artifact is opened its directory is prepended to the dynamic
//! library search variable so transitive dependencies placed next to it resolve.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CoreHeyError, Result};

/// Base file name of the native artifact, without suffix.
pub const LIBRARY_NAME: &str = "libcorehey";

/// Separator used inside `LD_LIBRARY_PATH` / `DYLD_LIBRARY_PATH`.
const SEARCH_PATH_SEPARATOR: char = ':';

/// Operating systems with a known artifact naming scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOs {
    MacOs,
    Linux,
    Windows,
}

impl HostOs {
    /// Shared library suffix, including the dot.
    #[must_use]
    pub const fn library_suffix(self) -> &'static str {
        match self {
            Self::MacOs => ".dylib",
            Self::Linux => ".so",
            Self::Windows => ".dll",
        }
    }

    /// Environment variable consulted by the dynamic loader, if any.
    #[must_use]
    pub const fn search_path_var(self) -> Option<&'static str> {
        match self {
            Self::MacOs => Some("DYLD_LIBRARY_PATH"),
            Self::Linux => Some("LD_LIBRARY_PATH"),
            Self::Windows => None,
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MacOs => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// CPU architectures that get an architecture-qualified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostArch {
    X86_64,
    Aarch64,
    Other(String),
}

impl HostArch {
    fn parse(arch: &str) -> Self {
        match arch {
            "x86_64" | "amd64" => Self::X86_64,
            "aarch64" | "arm64" => Self::Aarch64,
            other => Self::Other(other.to_string()),
        }
    }

    /// Tag used in qualified artifact names.
    #[must_use]
    pub fn artifact_tag(&self) -> Option<&'static str> {
        match self {
            Self::X86_64 => Some("amd64"),
            Self::Aarch64 => Some("arm64"),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Aarch64 => write!(f, "aarch64"),
            Self::Other(arch) => write!(f, "{arch}"),
        }
    }
}

/// An OS/architecture pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: HostOs,
    pub arch: HostArch,
}

impl Platform {
    /// Detect the platform this process is running on.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::UnsupportedPlatform`] on anything other than
    /// macOS, Linux or Windows.
    pub fn current() -> Result<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Build a platform from `std::env::consts`-style names.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::UnsupportedPlatform`] for an unknown OS.
    pub fn from_parts(os: &str, arch: &str) -> Result<Self> {
        let host_os = match os {
            "macos" | "darwin" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            "windows" => HostOs::Windows,
            _ => {
                return Err(CoreHeyError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                })
            }
        };

        Ok(Self {
            os: host_os,
            arch: HostArch::parse(arch),
        })
    }

    /// Unqualified artifact file name, e.g. `libcorehey.so`.
    #[must_use]
    pub fn artifact_file_name(&self) -> String {
        format!("{LIBRARY_NAME}{}", self.os.library_suffix())
    }

    /// Architecture-qualified file name. Only Linux ships per-arch builds.
    #[must_use]
    pub fn qualified_file_name(&self) -> Option<String> {
        if self.os != HostOs::Linux {
            return None;
        }
        self.arch
            .artifact_tag()
            .map(|tag| format!("{LIBRARY_NAME}_{tag}{}", self.os.library_suffix()))
    }

    /// File names to probe, most specific first.
    #[must_use]
    pub fn candidate_file_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if let Some(qualified) = self.qualified_file_name() {
            names.push(qualified);
        }
        names.push(self.artifact_file_name());
        names
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Locates the native artifact inside a library directory.
#[derive(Debug, Clone)]
pub struct PlatformResolver {
    platform: Platform,
    library_dir: PathBuf,
}

impl PlatformResolver {
    /// Create a resolver for an explicit platform.
    #[must_use]
    pub fn new(platform: Platform, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            library_dir: library_dir.into(),
        }
    }

    /// Create a resolver for the running host.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::UnsupportedPlatform`] on unknown hosts.
    pub fn for_host(library_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(Platform::current()?, library_dir))
    }

    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    #[must_use]
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Every path that will be probed, in order.
    #[must_use]
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        self.platform
            .candidate_file_names()
            .into_iter()
            .map(|name| self.library_dir.join(name))
            .collect()
    }

    /// Path of the first candidate that exists on disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::LibraryNotFound`] listing every probed path.
    pub fn resolve_artifact_path(&self) -> Result<PathBuf> {
        let probed = self.candidate_paths();
        if let Some(found) = probed.iter().find(|path| path.is_file()) {
            debug!(path = %found.display(), "Resolved native artifact");
            return Ok(found.clone());
        }
        Err(CoreHeyError::LibraryNotFound { probed })
    }

    /// The loader search variable and its current value. `None` on Windows.
    #[must_use]
    pub fn resolve_search_path_var(&self) -> Option<(&'static str, Option<String>)> {
        self.platform
            .os
            .search_path_var()
            .map(|var| (var, std::env::var(var).ok()))
    }

    /// Prepend the library directory to the loader search variable.
    ///
    /// Returns the new value when the variable was changed.
    pub fn ensure_search_path(&self) -> Option<String> {
        let (var, current) = self.resolve_search_path_var()?;
        let dir = self.library_dir.to_string_lossy();
        let updated = prepend_search_path(&dir, current.as_deref())?;
        debug!(var, value = %updated, "Updating library search path");
        std::env::set_var(var, &updated);
        Some(updated)
    }
}

/// Compute `dir:current`, or `None` when `dir` is already an entry.
#[must_use]
pub fn prepend_search_path(dir: &str, current: Option<&str>) -> Option<String> {
    match current.filter(|value| !value.is_empty()) {
        None => Some(dir.to_string()),
        Some(value) => {
            if value.split(SEARCH_PATH_SEPARATOR).any(|entry| entry == dir) {
                None
            } else {
                Some(format!("{dir}{SEARCH_PATH_SEPARATOR}{value}"))
            }
        }
    }
}
