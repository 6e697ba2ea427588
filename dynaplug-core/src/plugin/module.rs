//! The contract between dynaplug and a loaded plugin module.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A resource a plugin registers during activation and that must be released
/// when the plugin is deactivated.
pub trait Disposable: Send {
    fn dispose(self: Box<Self>);
}

impl<F> Disposable for F
where
    F: FnOnce() + Send,
{
    fn dispose(self: Box<Self>) {
        (*self)()
    }
}

/// Handle given to a module for one activation.
///
/// Resources pushed here are released in registration order when the
/// matching deactivation completes, each exactly once.
pub struct ActivationContext {
    plugin_name: String,
    plugin_dir: PathBuf,
    subscriptions: Vec<Box<dyn Disposable>>,
}

impl ActivationContext {
    pub fn new(plugin_name: impl Into<String>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            plugin_dir: plugin_dir.into(),
            subscriptions: Vec::new(),
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn push(&mut self, disposable: impl Disposable + 'static) {
        self.subscriptions.push(Box::new(disposable));
    }

    pub fn push_boxed(&mut self, disposable: Box<dyn Disposable>) {
        self.subscriptions.push(disposable);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Releases every registered resource in registration order and returns
    /// how many were released. The list is empty afterwards.
    pub(crate) fn dispose_all(&mut self) -> usize {
        let subscriptions = std::mem::take(&mut self.subscriptions);
        let released = subscriptions.len();
        for subscription in subscriptions {
            subscription.dispose();
        }
        released
    }
}

impl fmt::Debug for ActivationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationContext")
            .field("plugin_name", &self.plugin_name)
            .field("plugin_dir", &self.plugin_dir)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// A compiled plugin. Loaded modules run with full trust in-process.
pub trait PluginModule: Send {
    fn activate(&mut self, context: &mut ActivationContext) -> Result<(), ModuleError>;

    fn deactivate(&mut self, context: &mut ActivationContext) -> Result<(), ModuleError>;
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to load module {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    #[error("module {} does not export `{symbol}`", .path.display())]
    ContractViolation { path: PathBuf, symbol: String },

    #[error("ABI version mismatch: plugin uses v{found}, dynaplug uses v{expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("activation failed: {0}")]
    Activation(String),

    #[error("deactivation failed: {0}")]
    Deactivation(String),
}
