pub mod binary;
pub mod debounce;
pub mod host;
pub mod plugin;
pub mod process;
pub mod settings;
pub mod watch;

// Public library API - editor integrations embed these types directly, the
// rest is public for plugin authors and tests.
pub use host::{HostActor, HostActorBuilder, HostEvent, HostMessage, HostUi, PluginHost};
pub use plugin::native::{PluginDescriptor, DYNAPLUG_ABI_VERSION};
pub use plugin::{
    ActivationContext, Disposable, ModuleError, ModuleLoader, Plugin, PluginError, PluginModule,
    PluginState, WorkspaceRegistry,
};
pub use process::{CommandSpec, ProcessRunner, ShellOutput};
pub use settings::{Settings, SettingsManager};
