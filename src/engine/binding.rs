//! Process-wide engine binding.
//!
//! One engine library is installed per process, before any session is
//! created. Sessions keep an `Arc` to the binding, so the library stays loaded
//! until the last of them is dropped even after [`EngineBinding::teardown`].
//!
//! Engine libraries export their factory with [`export_engine!`](crate::export_engine).
//! Both sides pass Rust trait objects, so the library must be built with the
//! same compiler and the same version of this crate; the exported ABI version
//! is checked on load.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::EngineFactory;
use crate::error::BridgeError;

/// Symbol returning the boxed factory.
pub const CREATE_ENGINE_SYMBOL: &[u8] = b"sevenbridge_create_engine";
/// Symbol returning [`ENGINE_ABI_VERSION`].
pub const ABI_VERSION_SYMBOL: &[u8] = b"sevenbridge_abi_version";
/// Bumped whenever the engine traits change shape.
pub const ENGINE_ABI_VERSION: u32 = 1;

#[allow(improper_ctypes_definitions)]
pub type CreateEngineFn = unsafe extern "C" fn() -> *mut Box<dyn EngineFactory>;
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

static BINDING: Mutex<Option<Arc<EngineBinding>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<EngineBinding>>> {
    BINDING.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An engine factory together with the library that provides its code.
pub struct EngineBinding {
    // Declared before `library` so the factory is dropped while its code is still mapped.
    factory: Box<dyn EngineFactory>,
    library: Option<libloading::Library>,
    origin: Option<PathBuf>,
}

impl std::fmt::Debug for EngineBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBinding")
            .field("origin", &self.origin)
            .field("dynamic", &self.library.is_some())
            .finish()
    }
}

impl EngineBinding {
    /// Wraps an in-process factory. Used by statically linked engines and tests.
    pub fn from_factory(factory: impl EngineFactory + 'static) -> Arc<Self> {
        Arc::new(Self { factory: Box::new(factory), library: None, origin: None })
    }

    /// Loads an engine library without installing it.
    pub fn open(path: &Path) -> Result<Arc<Self>, BridgeError> {
        tracing::debug!(path = %path.display(), "loading engine library");
        // SAFETY: loading runs the library's initialisers; engine libraries are
        // trusted plugins built against this crate.
        let library = unsafe { libloading::Library::new(path) }?;

        // SAFETY: both symbols are declared by `export_engine!` with exactly
        // these signatures; the version check guards the trait layout.
        let factory = unsafe {
            let version: libloading::Symbol<AbiVersionFn> = library.get(ABI_VERSION_SYMBOL)?;
            let found = version();
            if found != ENGINE_ABI_VERSION {
                return Err(BridgeError::Library(format!(
                    "{}: engine ABI version {found}, expected {ENGINE_ABI_VERSION}",
                    path.display()
                )));
            }
            let create: libloading::Symbol<CreateEngineFn> = library.get(CREATE_ENGINE_SYMBOL)?;
            let raw = create();
            if raw.is_null() {
                return Err(BridgeError::Library(format!(
                    "{}: engine factory creation failed",
                    path.display()
                )));
            }
            *Box::from_raw(raw)
        };

        Ok(Arc::new(Self { factory, library: Some(library), origin: Some(path.to_path_buf()) }))
    }

    /// Loads the library at `path` and installs it for the process.
    pub fn load(path: &Path) -> Result<Arc<Self>, BridgeError> {
        let binding = Self::open(path)?;
        Self::install(Arc::clone(&binding))?;
        Ok(binding)
    }

    /// Installs `binding` as the process engine. Fails if one is installed.
    pub fn install(binding: Arc<Self>) -> Result<(), BridgeError> {
        let mut slot = slot();
        if slot.is_some() {
            return Err(BridgeError::Library("an engine binding is already installed".into()));
        }
        *slot = Some(binding);
        Ok(())
    }

    /// The installed binding.
    pub fn current() -> Result<Arc<Self>, BridgeError> {
        slot().clone().ok_or(BridgeError::BindingUnavailable)
    }

    /// Uninstalls the process binding. Live sessions keep their own reference.
    pub fn teardown() -> Option<Arc<Self>> {
        slot().take()
    }

    pub fn factory(&self) -> &dyn EngineFactory {
        self.factory.as_ref()
    }

    /// Path the library was loaded from, if it was loaded dynamically.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

/// Exports an engine factory from a `cdylib` so [`EngineBinding::load`] can find it.
///
/// ```rust,ignore
/// struct MyEngine;
/// impl sevenbridge::engine::EngineFactory for MyEngine { /* ... */ }
/// sevenbridge::export_engine!(MyEngine);
/// ```
#[macro_export]
macro_rules! export_engine {
    ($factory:expr) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn sevenbridge_create_engine(
        ) -> *mut ::std::boxed::Box<dyn $crate::engine::EngineFactory> {
            let factory: ::std::boxed::Box<dyn $crate::engine::EngineFactory> =
                ::std::boxed::Box::new($factory);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(factory))
        }

        #[no_mangle]
        pub extern "C" fn sevenbridge_abi_version() -> u32 {
            $crate::engine::binding::ENGINE_ABI_VERSION
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_library_is_library_error() {
        let err = EngineBinding::open(Path::new("/nonexistent/libnope.so")).unwrap_err();
        assert!(matches!(err, BridgeError::Library(_)), "{err:?}");
    }
}
