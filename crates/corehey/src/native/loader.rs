//! Initialise-once loader for the native core.
//!
//! A [`LibraryLoader`] is built once at process start and shared by every
//! facade call. The first successful [`LibraryLoader::load`] opens the
//! artifact; later calls return the cached bridge. A failed load is not
//! cached, so a corrected library directory is picked up on the next call.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use super::bridge::NativeBridge;
use crate::error::Result;
use crate::platform::PlatformResolver;

/// Environment variable overriding the directory holding the native artifact.
pub const ENV_LIBRARY_DIR: &str = "COREHEY_LIBRARY_DIR";

type Opener = dyn Fn(&Path) -> Result<NativeBridge> + Send + Sync;

/// Process-wide handle to the loaded native core.
pub struct LibraryLoader {
    resolver: Option<PlatformResolver>,
    opener: Box<Opener>,
    handle: Mutex<Option<Arc<NativeBridge>>>,
    loads: AtomicUsize,
}

impl LibraryLoader {
    /// Loader that opens artifacts with the OS dynamic loader.
    #[must_use]
    pub fn new(resolver: PlatformResolver) -> Self {
        Self::with_opener(resolver, NativeBridge::open)
    }

    /// Loader for the host platform using `COREHEY_LIBRARY_DIR`, falling back
    /// to the directory of the running executable.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreHeyError::UnsupportedPlatform`] on unknown hosts.
    pub fn from_env() -> Result<Self> {
        let dir = std::env::var(ENV_LIBRARY_DIR)
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.parent().map(Path::to_path_buf))
            })
            .unwrap_or_else(|| PathBuf::from("."));

        debug!(dir = %dir.display(), "Native library directory");
        Ok(Self::new(PlatformResolver::for_host(dir)?))
    }

    /// Loader with a custom open step.
    ///
    /// Prepends the library directory to the loader search variable, so build
    /// loaders before spawning work that reads the environment.
    pub fn with_opener<F>(resolver: PlatformResolver, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<NativeBridge> + Send + Sync + 'static,
    {
        resolver.ensure_search_path();
        Self {
            resolver: Some(resolver),
            opener: Box::new(opener),
            handle: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Loader that already holds a bridge, e.g. one built from an
    /// in-memory [`crate::native::SymbolTable`].
    #[must_use]
    pub fn preloaded(bridge: NativeBridge) -> Self {
        Self {
            resolver: None,
            opener: Box::new(NativeBridge::open),
            handle: Mutex::new(Some(Arc::new(bridge))),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the loaded bridge, loading it on first use.
    ///
    /// Concurrent first callers block on the same lock; exactly one performs
    /// the OS load.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreHeyError::LibraryNotFound`],
    /// [`crate::CoreHeyError::LibraryLoadFailed`] or
    /// [`crate::CoreHeyError::MissingRequiredSymbol`].
    pub fn load(&self) -> Result<Arc<NativeBridge>> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bridge) = handle.as_ref() {
            return Ok(Arc::clone(bridge));
        }

        let Some(resolver) = self.resolver.as_ref() else {
            // Only `preloaded` omits the resolver, and it always starts loaded.
            return Err(crate::CoreHeyError::LibraryNotFound { probed: Vec::new() });
        };

        let path = resolver.resolve_artifact_path()?;

        self.loads.fetch_add(1, Ordering::SeqCst);
        let bridge = Arc::new((self.opener)(&path)?);
        info!(
            platform = %resolver.platform(),
            path = %path.display(),
            "Native bridge ready"
        );

        *handle = Some(Arc::clone(&bridge));
        Ok(bridge)
    }

    /// Number of times the open step has run.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[must_use]
    pub fn resolver(&self) -> Option<&PlatformResolver> {
        self.resolver.as_ref()
    }
}

impl std::fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryLoader")
            .field("resolver", &self.resolver)
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreHeyError;
    use crate::native::SymbolTable;
    use crate::platform::Platform;
    use serial_test::serial;
    use std::os::raw::c_char;
    use std::ptr;
    use std::sync::atomic::AtomicBool;

    unsafe extern "C" fn null_text(
        _: *const c_char,
        _: *const c_char,
        _: *const c_char,
    ) -> *mut c_char {
        ptr::null_mut()
    }

    unsafe extern "C" fn noop_release(_: *mut c_char) {}

    fn fake_bridge(_: &Path) -> Result<NativeBridge> {
        let symbols = SymbolTable::builder()
            .quick_replies(null_text)
            .typification(null_text)
            .free_c_string(noop_release)
            .build()?;
        Ok(NativeBridge::from_symbols(symbols))
    }

    fn linux_resolver(dir: &Path) -> PlatformResolver {
        PlatformResolver::new(Platform::from_parts("linux", "x86_64").unwrap(), dir)
    }

    #[test]
    #[serial]
    fn test_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libcorehey.so"), b"").unwrap();
        let loader = LibraryLoader::with_opener(linux_resolver(dir.path()), fake_bridge);

        let first = loader.load().unwrap();
        let second = loader.load().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count(), 1);
        assert!(loader.is_loaded());
    }

    #[test]
    #[serial]
    fn test_missing_artifact_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LibraryLoader::with_opener(linux_resolver(dir.path()), fake_bridge);

        let err = loader.load().unwrap_err();
        assert!(matches!(err, CoreHeyError::LibraryNotFound { .. }));
        assert_eq!(loader.load_count(), 0);

        std::fs::write(dir.path().join("libcorehey_amd64.so"), b"").unwrap();
        loader.load().unwrap();
        assert_eq!(loader.load_count(), 1);
    }

    #[test]
    #[serial]
    fn test_failed_open_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libcorehey.so"), b"").unwrap();
        let fail = Arc::new(AtomicBool::new(true));
        let fail_flag = Arc::clone(&fail);

        let loader = LibraryLoader::with_opener(linux_resolver(dir.path()), move |path| {
            if fail_flag.load(Ordering::SeqCst) {
                return Err(CoreHeyError::LibraryLoadFailed {
                    path: path.to_path_buf(),
                    reason: "wrong ELF class".to_string(),
                });
            }
            fake_bridge(path)
        });

        assert!(matches!(
            loader.load().unwrap_err(),
            CoreHeyError::LibraryLoadFailed { .. }
        ));
        assert!(!loader.is_loaded());

        fail.store(false, Ordering::SeqCst);
        loader.load().unwrap();
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    #[serial]
    fn test_concurrent_first_load_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libcorehey.so"), b"").unwrap();
        let loader = Arc::new(LibraryLoader::with_opener(
            linux_resolver(dir.path()),
            |path| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                fake_bridge(path)
            },
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = Arc::clone(&loader);
                std::thread::spawn(move || loader.load().unwrap())
            })
            .collect();
        let bridges: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loader.load_count(), 1);
        assert!(bridges.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    #[serial]
    fn test_search_path_prepended_once_before_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libcorehey.so"), b"").unwrap();
        let original = std::env::var("LD_LIBRARY_PATH").ok();
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var("LD_LIBRARY_PATH", "/usr/lib");
        }

        let expected = format!("{}:/usr/lib", dir.path().display());
        let loader = LibraryLoader::with_opener(linux_resolver(dir.path()), |path| {
            assert_eq!(
                std::env::var("LD_LIBRARY_PATH").unwrap(),
                format!("{}:/usr/lib", path.parent().unwrap().display())
            );
            fake_bridge(path)
        });
        assert_eq!(std::env::var("LD_LIBRARY_PATH").unwrap(), expected);

        loader.load().unwrap();
        let again = LibraryLoader::with_opener(linux_resolver(dir.path()), fake_bridge);
        again.load().unwrap();
        assert_eq!(loader.resolver().unwrap().ensure_search_path(), None);
        assert_eq!(std::env::var("LD_LIBRARY_PATH").unwrap(), expected);

        unsafe {
            match original {
                Some(value) => std::env::set_var("LD_LIBRARY_PATH", value),
                None => std::env::remove_var("LD_LIBRARY_PATH"),
            }
        }
    }

    #[test]
    fn test_preloaded_never_opens() {
        let bridge = fake_bridge(Path::new("<test>")).unwrap();
        let loader = LibraryLoader::preloaded(bridge);

        loader.load().unwrap();
        assert_eq!(loader.load_count(), 0);
    }

    #[test]
    fn test_real_open_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libcorehey.so");
        std::fs::write(&path, b"not an ELF file").unwrap();

        let err = NativeBridge::open(&path).unwrap_err();
        assert!(matches!(err, CoreHeyError::LibraryLoadFailed { .. }));
    }
}
