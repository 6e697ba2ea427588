//! C ABI that native plugins export.

use super::super::module::ActivationContext;

/// Current ABI version. Plugins must match this version to be loaded.
pub const DYNAPLUG_ABI_VERSION: u32 = 1;

/// Status returned by activate/deactivate when the module succeeded.
pub const STATUS_OK: i32 = 0;
/// Status returned when the module reported an error.
pub const STATUS_ERROR: i32 = 1;
/// Status returned when the module panicked.
pub const STATUS_PANIC: i32 = 2;

/// Plugin descriptor returned by the plugin's `dynaplug_plugin_descriptor` function.
#[repr(C)]
pub struct PluginDescriptor {
    /// ABI version this plugin was compiled against
    pub abi_version: u32,
    /// Plugin name (null-terminated UTF-8 string)
    pub name: *const std::ffi::c_char,
    /// Plugin version (null-terminated UTF-8 string)
    pub version: *const std::ffi::c_char,
}

// The descriptor only points at static string data.
unsafe impl Sync for PluginDescriptor {}

/// Raw pointer type for plugin instances.
pub type RawModulePtr = *mut std::ffi::c_void;

/// Function signature for `dynaplug_plugin_descriptor`.
pub type DescriptorFn = unsafe extern "C" fn() -> *const PluginDescriptor;

/// Function signature for `dynaplug_plugin_create`.
pub type CreateFn = unsafe extern "C" fn() -> RawModulePtr;

/// Function signature for `dynaplug_plugin_destroy`.
pub type DestroyFn = unsafe extern "C" fn(RawModulePtr);

/// Function signature for `dynaplug_plugin_activate` and
/// `dynaplug_plugin_deactivate`. Returns one of the `STATUS_*` codes.
pub type LifecycleFn = unsafe extern "C" fn(RawModulePtr, *mut ActivationContext) -> i32;

pub const DESCRIPTOR_SYMBOL: &[u8] = b"dynaplug_plugin_descriptor\0";
pub const CREATE_SYMBOL: &[u8] = b"dynaplug_plugin_create\0";
pub const DESTROY_SYMBOL: &[u8] = b"dynaplug_plugin_destroy\0";
pub const ACTIVATE_SYMBOL: &[u8] = b"dynaplug_plugin_activate\0";
pub const DEACTIVATE_SYMBOL: &[u8] = b"dynaplug_plugin_deactivate\0";

/// Macro to declare a native plugin.
///
/// Generates the C ABI functions for a type implementing
/// [`PluginModule`](crate::plugin::PluginModule). The plugin crate must be
/// built as a `cdylib` with the same compiler and dynaplug version as the
/// host, since the activation context crosses the boundary as a Rust type.
///
/// # Example
///
/// ```rust,ignore
/// use dynaplug_core::plugin::{ActivationContext, ModuleError, PluginModule};
///
/// #[derive(Default)]
/// struct Greeter;
///
/// impl PluginModule for Greeter {
///     fn activate(&mut self, ctx: &mut ActivationContext) -> Result<(), ModuleError> {
///         ctx.push(|| println!("bye"));
///         Ok(())
///     }
///     fn deactivate(&mut self, _ctx: &mut ActivationContext) -> Result<(), ModuleError> {
///         Ok(())
///     }
/// }
///
/// dynaplug_core::dynaplug_plugin!(Greeter, Greeter::default);
/// ```
#[macro_export]
macro_rules! dynaplug_plugin {
    ($plugin_type:ty, $constructor:expr) => {
        static PLUGIN_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "\0");
        static PLUGIN_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

        static DESCRIPTOR: $crate::plugin::native::abi::PluginDescriptor =
            $crate::plugin::native::abi::PluginDescriptor {
                abi_version: $crate::plugin::native::abi::DYNAPLUG_ABI_VERSION,
                name: PLUGIN_NAME.as_ptr() as *const std::ffi::c_char,
                version: PLUGIN_VERSION.as_ptr() as *const std::ffi::c_char,
            };

        #[no_mangle]
        pub unsafe extern "C" fn dynaplug_plugin_descriptor(
        ) -> *const $crate::plugin::native::abi::PluginDescriptor {
            &DESCRIPTOR
        }

        #[no_mangle]
        pub unsafe extern "C" fn dynaplug_plugin_create(
        ) -> $crate::plugin::native::abi::RawModulePtr {
            let plugin: Box<$plugin_type> = Box::new($constructor());
            Box::into_raw(plugin) as $crate::plugin::native::abi::RawModulePtr
        }

        #[no_mangle]
        pub unsafe extern "C" fn dynaplug_plugin_destroy(
            ptr: $crate::plugin::native::abi::RawModulePtr,
        ) {
            if !ptr.is_null() {
                let _ = Box::from_raw(ptr as *mut $plugin_type);
            }
        }

        #[no_mangle]
        pub unsafe extern "C" fn dynaplug_plugin_activate(
            ptr: $crate::plugin::native::abi::RawModulePtr,
            context: *mut $crate::plugin::ActivationContext,
        ) -> i32 {
            let plugin = &mut *(ptr as *mut $plugin_type);
            let context = &mut *context;
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                $crate::plugin::PluginModule::activate(plugin, context)
            })) {
                Ok(Ok(())) => $crate::plugin::native::abi::STATUS_OK,
                Ok(Err(_)) => $crate::plugin::native::abi::STATUS_ERROR,
                Err(_) => $crate::plugin::native::abi::STATUS_PANIC,
            }
        }

        #[no_mangle]
        pub unsafe extern "C" fn dynaplug_plugin_deactivate(
            ptr: $crate::plugin::native::abi::RawModulePtr,
            context: *mut $crate::plugin::ActivationContext,
        ) -> i32 {
            let plugin = &mut *(ptr as *mut $plugin_type);
            let context = &mut *context;
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                $crate::plugin::PluginModule::deactivate(plugin, context)
            })) {
                Ok(Ok(())) => $crate::plugin::native::abi::STATUS_OK,
                Ok(Err(_)) => $crate::plugin::native::abi::STATUS_ERROR,
                Err(_) => $crate::plugin::native::abi::STATUS_PANIC,
            }
        }
    };
}
