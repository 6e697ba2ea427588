//! Workspace plugins.
//!
//! A plugin is a directory inside a workspace root holding sources, a
//! manifest and installed dependencies. Each discovered plugin gets a
//! [`Plugin`] lifecycle manager that compiles it with an external compiler,
//! loads the compiled entry point through a [`ModuleLoader`], watches the
//! sources and hot-swaps the module when they change. The
//! [`WorkspaceRegistry`] discovers plugins per workspace root.
//!
//! ## Module kinds
//!
//! - **In-process**: factories published to an [`InProcessLoader`]
//! - **Native**: dynamic libraries loaded by [`native::NativeModuleLoader`]

pub mod diagnostics;
pub mod lifecycle;
pub mod loader;
pub mod module;
pub mod native;
pub mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::ui::HostUi;
use crate::process::ProcessRunner;
use crate::settings::{Settings, SettingsManager};
use crate::watch::{WatchPattern, WatchService};

pub use diagnostics::{document_uri, Diagnostics, DOCUMENT_SCHEME};
pub use lifecycle::Plugin;
pub use loader::{InProcessLoader, ModuleCache, ModuleFactory, ModuleLoader};
pub use module::{ActivationContext, Disposable, ModuleError, PluginModule};
pub use registry::WorkspaceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Created, nothing compiled yet
    Unloaded,
    /// First compilation running
    Compiling,
    /// A module is loaded and activated
    Active,
    /// The last compilation failed. A previously active module may still run.
    CompileFailed,
    /// Recompiling after a source change or an explicit reload
    Reloading,
    /// Compiled, but loading or activating the module failed
    ActivationFailed,
    /// Shut down for good
    Deactivated,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Compiling => "compiling",
            PluginState::Active => "active",
            PluginState::CompileFailed => "compile failed",
            PluginState::Reloading => "reloading",
            PluginState::ActivationFailed => "activation failed",
            PluginState::Deactivated => "deactivated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{name}': {source}")]
    Module { name: String, source: ModuleError },
}

/// Collaborators shared by every plugin of one host.
#[derive(Clone)]
pub struct PluginServices {
    pub runner: Arc<dyn ProcessRunner>,
    pub ui: Arc<dyn HostUi>,
    pub loader: Arc<dyn ModuleLoader>,
    pub watcher: Arc<dyn WatchService>,
    pub diagnostics: Arc<Diagnostics>,
    pub settings: SettingsManager,
}

/// Per-plugin paths and timings, fixed when the plugin is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOptions {
    pub entry: PathBuf,
    pub watch: WatchPattern,
    pub reload_delay: Duration,
}

impl PluginOptions {
    /// Derives the options for the plugin in `dir` from the layout settings.
    /// Build output and installed dependencies are excluded from watching.
    pub fn from_settings(dir: &Path, settings: &Settings) -> Self {
        let layout = &settings.layout;
        let entry = layout.entry_path(dir);
        let mut watch = WatchPattern::new(layout.watch_extensions.clone())
            .exclude(layout.dependency_path(dir));
        if let Some(output_dir) = entry.parent().filter(|parent| *parent != dir) {
            watch = watch.exclude(output_dir);
        }
        Self {
            entry,
            watch,
            reload_delay: settings.reload_delay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_layout() {
        let options = PluginOptions::from_settings(Path::new("/ws/hooks"), &Settings::default());

        assert_eq!(options.entry, PathBuf::from("/ws/hooks/out/plugin.js"));
        assert_eq!(options.reload_delay, Duration::from_millis(1000));
        assert_eq!(
            options.watch.excluded,
            vec![
                PathBuf::from("/ws/hooks/node_modules"),
                PathBuf::from("/ws/hooks/out")
            ]
        );
    }

    #[test]
    fn test_entry_at_plugin_root_does_not_exclude_sources() {
        let mut settings = Settings::default();
        settings.layout.entry_point = PathBuf::from("plugin.js");
        let options = PluginOptions::from_settings(Path::new("/ws/hooks"), &settings);

        assert_eq!(options.watch.excluded.len(), 1);
        assert!(options.watch.matches(Path::new("/ws/hooks/plugin.ts")));
    }
}
