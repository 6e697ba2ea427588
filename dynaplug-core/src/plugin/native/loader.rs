//! Native plugin loading using libloading.

use std::path::Path;
#[cfg(feature = "native-plugins")]
use std::sync::Arc;

#[cfg(feature = "native-plugins")]
use tracing::debug;

#[cfg(feature = "native-plugins")]
use super::abi::{
    CreateFn, DescriptorFn, DestroyFn, LifecycleFn, PluginDescriptor, RawModulePtr,
    ACTIVATE_SYMBOL, CREATE_SYMBOL, DEACTIVATE_SYMBOL, DESCRIPTOR_SYMBOL, DESTROY_SYMBOL,
    DYNAPLUG_ABI_VERSION, STATUS_OK, STATUS_PANIC,
};
use crate::plugin::loader::ModuleLoader;
#[cfg(feature = "native-plugins")]
use crate::plugin::loader::ModuleCache;
#[cfg(feature = "native-plugins")]
use crate::plugin::module::ActivationContext;
use crate::plugin::module::{ModuleError, PluginModule};

/// Loads compiled entry points as dynamic libraries (.so, .dylib, .dll).
///
/// Opened libraries are cached by path. Evicting a plugin directory drops the
/// cache's handles; the platform unloads a library once its last handle (the
/// cache's or a live module's) is gone. Platforms that never unload images
/// keep serving the old code for an unchanged path.
#[derive(Default)]
pub struct NativeModuleLoader {
    #[cfg(feature = "native-plugins")]
    libraries: ModuleCache<Arc<libloading::Library>>,
}

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "native-plugins")]
impl ModuleLoader for NativeModuleLoader {
    fn load(&self, entry: &Path) -> Result<Box<dyn PluginModule>, ModuleError> {
        let library = self.libraries.get_or_try_insert(entry, || {
            debug!(path = %entry.display(), "Opening native plugin library");
            // SAFETY: loading a library runs its initializers. Plugins run with
            // full trust; the host refuses to start in untrusted workspaces.
            unsafe { libloading::Library::new(entry) }
                .map(Arc::new)
                .map_err(|e| ModuleError::Load {
                    path: entry.to_path_buf(),
                    message: e.to_string(),
                })
        })?;
        NativeModule::instantiate(entry, library).map(|module| Box::new(module) as _)
    }

    fn evict(&self, prefix: &Path) -> usize {
        self.libraries.evict_prefix(prefix)
    }
}

#[cfg(not(feature = "native-plugins"))]
impl ModuleLoader for NativeModuleLoader {
    fn load(&self, entry: &Path) -> Result<Box<dyn PluginModule>, ModuleError> {
        Err(ModuleError::Load {
            path: entry.to_path_buf(),
            message: "native plugin support is not enabled; compile with the 'native-plugins' feature"
                .to_string(),
        })
    }

    fn evict(&self, _prefix: &Path) -> usize {
        0
    }
}

#[cfg(feature = "native-plugins")]
fn symbol<T: Copy>(
    library: &libloading::Library,
    entry: &Path,
    name: &[u8],
) -> Result<T, ModuleError> {
    // SAFETY: the symbol type is fixed by the dynaplug ABI for each name.
    unsafe { library.get::<T>(name) }
        .map(|symbol| *symbol)
        .map_err(|_| ModuleError::ContractViolation {
            path: entry.to_path_buf(),
            symbol: String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
                .into_owned(),
        })
}

#[cfg(feature = "native-plugins")]
fn validate_descriptor(descriptor: &PluginDescriptor, entry: &Path) -> Result<(), ModuleError> {
    if descriptor.abi_version != DYNAPLUG_ABI_VERSION {
        return Err(ModuleError::AbiMismatch {
            expected: DYNAPLUG_ABI_VERSION,
            found: descriptor.abi_version,
        });
    }
    if descriptor.name.is_null() || descriptor.version.is_null() {
        return Err(ModuleError::Load {
            path: entry.to_path_buf(),
            message: "plugin descriptor has a null name or version".to_string(),
        });
    }
    Ok(())
}

/// One instance created by a native library.
#[cfg(feature = "native-plugins")]
pub struct NativeModule {
    entry: std::path::PathBuf,
    raw_ptr: RawModulePtr,
    activate_fn: LifecycleFn,
    deactivate_fn: LifecycleFn,
    destroy_fn: DestroyFn,
    // Keeps the code behind the function pointers mapped.
    _library: Arc<libloading::Library>,
}

#[cfg(feature = "native-plugins")]
impl NativeModule {
    fn instantiate(entry: &Path, library: Arc<libloading::Library>) -> Result<Self, ModuleError> {
        let descriptor_fn: DescriptorFn = symbol(&library, entry, DESCRIPTOR_SYMBOL)?;
        // SAFETY: the descriptor points at static data inside the library.
        let descriptor = unsafe { &*descriptor_fn() };
        validate_descriptor(descriptor, entry)?;

        let create_fn: CreateFn = symbol(&library, entry, CREATE_SYMBOL)?;
        let destroy_fn: DestroyFn = symbol(&library, entry, DESTROY_SYMBOL)?;
        let activate_fn: LifecycleFn = symbol(&library, entry, ACTIVATE_SYMBOL)?;
        let deactivate_fn: LifecycleFn = symbol(&library, entry, DEACTIVATE_SYMBOL)?;

        // SAFETY: create has no preconditions.
        let raw_ptr = unsafe { create_fn() };
        if raw_ptr.is_null() {
            return Err(ModuleError::Load {
                path: entry.to_path_buf(),
                message: "plugin create function returned null".to_string(),
            });
        }

        debug!(path = %entry.display(), "Instantiated native plugin");
        Ok(Self {
            entry: entry.to_path_buf(),
            raw_ptr,
            activate_fn,
            deactivate_fn,
            destroy_fn,
            _library: library,
        })
    }

    fn call(&self, function: LifecycleFn, context: &mut ActivationContext) -> i32 {
        // SAFETY: raw_ptr came from this library's create and is destroyed only
        // in Drop.
        unsafe { function(self.raw_ptr, context as *mut ActivationContext) }
    }

    fn describe(&self, status: i32) -> String {
        if status == STATUS_PANIC {
            format!("{} panicked", self.entry.display())
        } else {
            format!("{} returned status {status}", self.entry.display())
        }
    }
}

#[cfg(feature = "native-plugins")]
impl PluginModule for NativeModule {
    fn activate(&mut self, context: &mut ActivationContext) -> Result<(), ModuleError> {
        match self.call(self.activate_fn, context) {
            STATUS_OK => Ok(()),
            status => Err(ModuleError::Activation(self.describe(status))),
        }
    }

    fn deactivate(&mut self, context: &mut ActivationContext) -> Result<(), ModuleError> {
        match self.call(self.deactivate_fn, context) {
            STATUS_OK => Ok(()),
            status => Err(ModuleError::Deactivation(self.describe(status))),
        }
    }
}

#[cfg(feature = "native-plugins")]
impl Drop for NativeModule {
    fn drop(&mut self) {
        if !self.raw_ptr.is_null() {
            // SAFETY: the pointer is destroyed exactly once, here.
            unsafe { (self.destroy_fn)(self.raw_ptr) };
        }
    }
}

// The instance pointer is owned exclusively by this value and only touched
// through &mut self or Drop.
#[cfg(feature = "native-plugins")]
unsafe impl Send for NativeModule {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::native::abi::DYNAPLUG_ABI_VERSION;

    #[test]
    fn test_abi_version() {
        assert_eq!(DYNAPLUG_ABI_VERSION, 1);
    }

    #[test]
    #[cfg(not(feature = "native-plugins"))]
    fn test_load_without_feature() {
        let result = NativeModuleLoader::new().load(Path::new("nonexistent.so"));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("not enabled"));
    }

    #[test]
    #[cfg(feature = "native-plugins")]
    fn test_missing_library_is_load_error_and_not_cached() {
        let temp = tempfile::TempDir::new().unwrap();
        let entry = temp.path().join("out").join("plugin.so");
        let loader = NativeModuleLoader::new();

        let err = loader.load(&entry).err().unwrap();
        assert!(matches!(err, ModuleError::Load { .. }));
        assert_eq!(loader.evict(temp.path()), 0);
    }

    #[test]
    #[cfg(feature = "native-plugins")]
    fn test_descriptor_with_wrong_abi_is_rejected() {
        let descriptor = PluginDescriptor {
            abi_version: DYNAPLUG_ABI_VERSION + 1,
            name: b"x\0".as_ptr() as *const std::ffi::c_char,
            version: b"1\0".as_ptr() as *const std::ffi::c_char,
        };
        let err = validate_descriptor(&descriptor, Path::new("/p")).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::AbiMismatch { expected: 1, found: 2 }
        ));
    }
}
