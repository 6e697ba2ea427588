//! Discovery of plugins inside workspace roots.
//!
//! Each workspace root maps to the plugins found in its configured
//! `base_directories`. A root is only present while it has at least one
//! plugin. Failures are contained per directory: one broken plugin never
//! keeps its siblings (or other roots) from loading.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};

use super::lifecycle::Plugin;
use super::PluginServices;
use crate::host::ui::Severity;
use crate::process::CommandSpec;
use crate::settings::Tool;

struct Workspace {
    root: PathBuf,
    /// Keyed by configured directory, in configuration order.
    plugins: Vec<(String, Plugin)>,
}

#[derive(Default)]
struct RegistryState {
    /// Workspace roots the host currently has open.
    folders: Vec<PathBuf>,
    workspaces: Vec<Workspace>,
}

impl RegistryState {
    fn workspace_mut(&mut self, root: &Path) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.root == root)
    }
}

pub struct WorkspaceRegistry {
    services: PluginServices,
    state: Mutex<RegistryState>,
}

impl WorkspaceRegistry {
    pub fn new(services: PluginServices) -> Self {
        Self {
            services,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workspace roots that currently have at least one plugin.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.lock().workspaces.iter().map(|w| w.root.clone()).collect()
    }

    /// Workspace roots the host has open, with or without plugins.
    pub fn folders(&self) -> Vec<PathBuf> {
        self.lock().folders.clone()
    }

    pub fn plugins(&self, root: &Path) -> Vec<Plugin> {
        self.lock()
            .workspaces
            .iter()
            .find(|w| w.root == root)
            .map(|w| w.plugins.iter().map(|(_, plugin)| plugin.clone()).collect())
            .unwrap_or_default()
    }

    pub fn plugin(&self, root: &Path, directory: &str) -> Option<Plugin> {
        self.lock()
            .workspace_mut(root)
            .and_then(|w| w.plugins.iter().find(|(dir, _)| dir == directory))
            .map(|(_, plugin)| plugin.clone())
    }

    /// Discovers and loads the plugins of `root`. Returns how many new
    /// plugins were registered. Directories that already have a plugin are
    /// left alone.
    pub async fn register_workspace(&self, root: &Path) -> usize {
        {
            let mut state = self.lock();
            if !state.folders.iter().any(|folder| folder == root) {
                state.folders.push(root.to_path_buf());
            }
        }

        let directories = self.services.settings.settings().base_directories;
        let mut registered = 0;
        for directory in directories {
            match self.register_directory(root, &directory).await {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(root = %root.display(), directory, "Failed to load plugin: {e:#}");
                    self.services
                        .ui
                        .show_error(&format!("Failed to load plugin {directory}"));
                }
            }
        }
        info!(root = %root.display(), registered, "Workspace registered");
        registered
    }

    async fn register_directory(&self, root: &Path, directory: &str) -> Result<bool> {
        if self.plugin(root, directory).is_some() {
            return Ok(false);
        }

        let settings = self.services.settings.settings();
        let layout = &settings.layout;
        let dir = root.join(directory);
        if !layout.manifest_path(&dir).exists() {
            info!(
                "Directory '{directory}' has no {} in workspace {}",
                layout.manifest_file,
                root.display()
            );
            return Ok(false);
        }

        info!(directory, "Loading code from {}", dir.display());
        let dependencies = layout.dependency_path(&dir);
        if !dependencies.exists() {
            let install = CommandSpec::new(&settings.npm_path)
                .args(settings.install_args.iter().cloned())
                .current_dir(&dir);
            let run = format!("Run '{} install'", Tool::PackageManager.default_binary());
            let answer = self
                .services
                .ui
                .prompt(
                    Severity::Error,
                    &format!(
                        "No {} directory found. Tried {}",
                        layout.dependency_dir,
                        dependencies.display()
                    ),
                    &["abort".to_string(), run.clone()],
                )
                .await;
            if answer.as_deref() != Some(run.as_str()) {
                info!(directory, "Dependency installation declined, skipping plugin");
                return Ok(false);
            }
            self.services
                .runner
                .run(&install)
                .await
                .map_err(|failure| anyhow!(failure))
                .with_context(|| format!("Failed to install dependencies in {}", dir.display()))?;
        }

        let plugin = Plugin::new(dir, self.services.clone());
        {
            let mut state = self.lock();
            match state.workspace_mut(root) {
                Some(workspace) => workspace.plugins.push((directory.to_string(), plugin.clone())),
                None => state.workspaces.push(Workspace {
                    root: root.to_path_buf(),
                    plugins: vec![(directory.to_string(), plugin.clone())],
                }),
            }
        }
        plugin.load().await?;
        Ok(true)
    }

    /// Shuts down and forgets every plugin of `root`. Returns how many were
    /// removed; unregistering an unknown root removes nothing.
    pub async fn unregister_workspace(&self, root: &Path) -> usize {
        let removed = {
            let mut state = self.lock();
            match state.workspaces.iter().position(|w| w.root == root) {
                Some(index) => state.workspaces.remove(index).plugins,
                None => return 0,
            }
        };

        for (directory, plugin) in &removed {
            if let Err(e) = plugin.shutdown().await {
                error!(root = %root.display(), directory, "Failed to unload plugin: {e}");
                self.services
                    .ui
                    .show_error(&format!("Failed to unload plugin {directory}: {e}"));
            }
        }
        info!(root = %root.display(), removed = removed.len(), "Workspace unregistered");
        removed.len()
    }

    /// Unregisters every open workspace root, then registers them all again.
    pub async fn reload_plugins(&self) {
        let folders = self.folders();
        info!(roots = folders.len(), "Reloading all plugins");
        for root in &folders {
            self.unregister_workspace(root).await;
        }
        for root in &folders {
            self.register_workspace(root).await;
        }
    }

    /// Applies a change of the host's open workspace roots. Removals are
    /// processed first.
    pub async fn workspace_folders_changed(&self, added: &[PathBuf], removed: &[PathBuf]) {
        for root in removed {
            self.unregister_workspace(root).await;
            self.lock().folders.retain(|folder| folder != root);
        }
        for root in added {
            self.register_workspace(root).await;
        }
    }

    /// Unloads every plugin of every root.
    pub async fn shutdown(&self) {
        for root in self.roots() {
            self.unregister_workspace(&root).await;
        }
        if !self.lock().workspaces.is_empty() {
            warn!("Plugins were registered during shutdown");
        }
    }
}
