//! The per-plugin lifecycle manager.
//!
//! ```text
//! Unloaded -> Compiling -> {Active, CompileFailed, ActivationFailed}
//!          -> Reloading -> {Active, CompileFailed, ActivationFailed}
//!          -> Deactivated
//! ```
//!
//! Compile, activate, deactivate and reload all run under one async mutex per
//! plugin, so a debounced reload and an explicit one never interleave. A
//! failed recompilation leaves the running module untouched.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, error, info, warn};

use super::diagnostics::document_uri;
use super::module::{ActivationContext, ModuleError, PluginModule};
use super::{PluginError, PluginOptions, PluginServices, PluginState};
use crate::debounce::{Debouncer, TimerState};
use crate::process::CommandSpec;
use crate::watch::{ChangeCallback, WatchHandle};

/// A module together with the context of its current activation. Both exist
/// or neither does.
struct LoadedModule {
    module: Box<dyn PluginModule>,
    context: ActivationContext,
}

type Slot = Option<LoadedModule>;

struct PluginInner {
    name: String,
    dir: PathBuf,
    options: PluginOptions,
    services: PluginServices,
    slot: AsyncMutex<Slot>,
    state: Mutex<PluginState>,
    debouncer: Debouncer,
    watch: Mutex<Option<WatchHandle>>,
}

/// Lifecycle manager for one plugin directory. Clones share the plugin.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("dir", &self.inner.dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// Creates the manager for `dir` with options derived from the current
    /// settings.
    pub fn new(dir: impl Into<PathBuf>, services: PluginServices) -> Self {
        let dir = dir.into();
        let options = PluginOptions::from_settings(&dir, &services.settings.settings());
        Self::with_options(dir, options, services)
    }

    pub fn with_options(
        dir: impl Into<PathBuf>,
        options: PluginOptions,
        services: PluginServices,
    ) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let debouncer = Debouncer::new(options.reload_delay);
        Self {
            inner: Arc::new(PluginInner {
                name,
                dir,
                options,
                services,
                slot: AsyncMutex::new(None),
                state: Mutex::new(PluginState::Unloaded),
                debouncer,
                watch: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn entry(&self) -> &Path {
        &self.inner.options.entry
    }

    pub fn state(&self) -> PluginState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether a debounced reload is scheduled and has not fired yet.
    pub fn reload_pending(&self) -> bool {
        self.inner.debouncer.state() == TimerState::Armed
    }

    /// Whether a module is currently activated. Waits for any running
    /// operation on this plugin.
    pub async fn is_active(&self) -> bool {
        self.inner.slot.lock().await.is_some()
    }

    /// Resources registered by the active module, if any.
    pub async fn active_resources(&self) -> Option<usize> {
        self.inner
            .slot
            .lock()
            .await
            .as_ref()
            .map(|loaded| loaded.context.len())
    }

    /// Starts watching the sources, then compiles and activates.
    ///
    /// A compilation failure leaves the plugin in [`PluginState::CompileFailed`]
    /// and is not an error; the next successful reload brings it up.
    pub async fn load(&self) -> Result<(), PluginError> {
        let mut slot = self.inner.slot.lock().await;
        if self.state() == PluginState::Deactivated {
            return Ok(());
        }
        self.start_watch();
        self.inner.set_state(PluginState::Compiling);
        if !self.inner.compile().await {
            self.inner.set_state(PluginState::CompileFailed);
            return Ok(());
        }
        if slot.is_some() {
            self.inner.set_state(PluginState::Active);
            return Ok(());
        }
        self.inner.activate_locked(&mut slot)
    }

    /// Runs the compiler once. Returns whether it succeeded.
    pub async fn compile(&self) -> bool {
        let _slot = self.inner.slot.lock().await;
        self.inner.compile().await
    }

    /// Loads the compiled entry point and activates it. Does nothing when a
    /// module is already active.
    pub async fn activate(&self) -> Result<(), PluginError> {
        let mut slot = self.inner.slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        self.inner.activate_locked(&mut slot)
    }

    /// Deactivates the active module and releases its resources. Does nothing
    /// when no module is active.
    pub async fn deactivate(&self) -> Result<(), PluginError> {
        let mut slot = self.lock_slot().await;
        if slot.is_none() {
            return Ok(());
        }
        let result = self.inner.deactivate_locked(&mut slot);
        if self.state() != PluginState::Deactivated {
            self.inner.set_state(PluginState::Unloaded);
        }
        result
    }

    /// Recompiles and, only if that succeeds, swaps the active module for a
    /// fresh instance of the new code.
    pub async fn reload(&self) -> Result<(), PluginError> {
        let mut slot = self.lock_slot().await;
        if self.state() == PluginState::Deactivated {
            debug!(plugin = %self.inner.name, "Ignoring reload of deactivated plugin");
            return Ok(());
        }

        self.inner.set_state(PluginState::Reloading);
        if !self.inner.compile().await {
            self.inner.set_state(PluginState::CompileFailed);
            return Ok(());
        }

        if let Err(e) = self.inner.deactivate_locked(&mut slot) {
            self.inner.set_state(PluginState::Unloaded);
            return Err(e);
        }
        self.inner.activate_locked(&mut slot)
    }

    /// Schedules a reload through the debouncer. Returns `false` when a reload
    /// is already scheduled (the request is absorbed) or the plugin is shut
    /// down.
    pub fn request_reload(&self) -> bool {
        if self.state() == PluginState::Deactivated {
            return false;
        }
        let weak = Arc::downgrade(&self.inner);
        let armed = self.inner.debouncer.trigger(move || reload_weak(weak));
        if armed {
            debug!(
                plugin = %self.inner.name,
                delay_ms = self.inner.debouncer.delay().as_millis() as u64,
                "Reload scheduled"
            );
        }
        armed
    }

    /// Stops watching, deactivates and moves to the terminal state. Reloads
    /// that fire afterwards are ignored.
    pub async fn shutdown(&self) -> Result<(), PluginError> {
        let mut slot = self.lock_slot().await;
        let watch = self
            .inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(watch);

        let result = self.inner.deactivate_locked(&mut slot);
        self.inner.set_state(PluginState::Deactivated);
        result
    }

    async fn lock_slot(&self) -> AsyncMutexGuard<'_, Slot> {
        self.inner.slot.lock().await
    }

    fn start_watch(&self) {
        let mut watch = self
            .inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if watch.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let on_change: ChangeCallback = Arc::new(move |path: PathBuf| {
            if let Some(inner) = weak.upgrade() {
                debug!(plugin = %inner.name, path = %path.display(), "Plugin source changed");
                Plugin { inner }.request_reload();
            }
        });

        let pattern = self.inner.options.watch.clone();
        debug!(
            plugin = %self.inner.name,
            pattern = %pattern.describe(),
            "Watching plugin sources"
        );
        match self
            .inner
            .services
            .watcher
            .watch(&self.inner.dir, pattern, on_change)
        {
            Ok(handle) => *watch = Some(handle),
            Err(e) => warn!(
                plugin = %self.inner.name,
                "Failed to watch plugin sources, changes will not trigger reloads: {e:#}"
            ),
        }
    }
}

async fn reload_weak(weak: Weak<PluginInner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let plugin = Plugin { inner };
    if let Err(e) = plugin.reload().await {
        error!(plugin = %plugin.inner.name, "Reload failed: {e}");
        plugin
            .inner
            .services
            .ui
            .show_error(&format!("Failed to reload plugin {}: {e}", plugin.dir().display()));
    }
}

impl PluginInner {
    fn set_state(&self, state: PluginState) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            info!(plugin = %self.name, from = %previous, to = %state, "Plugin state changed");
            self.services.ui.plugin_state_changed(&self.dir, state);
        }
    }

    fn module_error(&self, source: ModuleError) -> PluginError {
        PluginError::Module {
            name: self.name.clone(),
            source,
        }
    }

    async fn compile(&self) -> bool {
        self.services.diagnostics.clear();
        let settings = self.services.settings.settings();
        let spec = CommandSpec::new(settings.tsc_path)
            .args(settings.compile_args)
            .current_dir(&self.dir);

        match self.services.runner.run(&spec).await {
            Ok(_) => {
                debug!(plugin = %self.name, "Compilation succeeded");
                true
            }
            Err(failure) => {
                warn!(plugin = %self.name, "Compilation failed: {failure}");
                self.services.diagnostics.record(failure.output);
                self.services
                    .ui
                    .show_error(&format!("Failed to compile {}", self.dir.display()));
                self.services.ui.open_document(&document_uri(&self.dir));
                false
            }
        }
    }

    fn activate_locked(&self, slot: &mut Slot) -> Result<(), PluginError> {
        let mut context = ActivationContext::new(self.name.clone(), self.dir.clone());

        let mut module = match self.services.loader.load(&self.options.entry) {
            Ok(module) => module,
            Err(e) => {
                self.services.loader.evict(&self.dir);
                self.set_state(PluginState::ActivationFailed);
                return Err(self.module_error(e));
            }
        };

        if let Err(e) = module.activate(&mut context) {
            let released = context.dispose_all();
            drop(module);
            self.services.loader.evict(&self.dir);
            debug!(plugin = %self.name, released, "Released resources of failed activation");
            self.set_state(PluginState::ActivationFailed);
            return Err(self.module_error(e));
        }

        info!(
            plugin = %self.name,
            entry = %self.options.entry.display(),
            resources = context.len(),
            "Plugin activated"
        );
        *slot = Some(LoadedModule { module, context });
        self.set_state(PluginState::Active);
        Ok(())
    }

    /// Deactivates and clears the slot. The resources are released and the
    /// cache evicted even when the module's own deactivation fails.
    fn deactivate_locked(&self, slot: &mut Slot) -> Result<(), PluginError> {
        let Some(LoadedModule {
            mut module,
            mut context,
        }) = slot.take()
        else {
            return Ok(());
        };

        let result = module.deactivate(&mut context);
        let released = context.dispose_all();
        drop(module);
        let evicted = self.services.loader.evict(&self.dir);
        info!(plugin = %self.name, released, evicted, "Plugin deactivated");

        result.map_err(|e| self.module_error(e))
    }
}
