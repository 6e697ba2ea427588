//! Native plugins: compiled entry points loaded as dynamic libraries.
//!
//! **Security Note**: native plugins have full access to the system. They are
//! only loaded when the host runs in a trusted workspace.
//!
//! ## Plugin ABI
//!
//! A plugin library exports five C functions:
//!
//! ```c
//! const PluginDescriptor* dynaplug_plugin_descriptor();
//! Module* dynaplug_plugin_create();
//! void dynaplug_plugin_destroy(Module* module);
//! int dynaplug_plugin_activate(Module* module, ActivationContext* context);
//! int dynaplug_plugin_deactivate(Module* module, ActivationContext* context);
//! ```
//!
//! A library that lacks `activate` or `deactivate` violates the module
//! contract and fails to load. Use the [`dynaplug_plugin!`](crate::dynaplug_plugin)
//! macro to generate all five.

pub mod abi;
pub mod loader;

pub use abi::{PluginDescriptor, DYNAPLUG_ABI_VERSION};
pub use loader::NativeModuleLoader;
