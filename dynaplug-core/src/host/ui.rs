//! The editor-facing user interface seam.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::plugin::PluginState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

pub type ProgressId = u64;

/// Everything dynaplug asks of the host editor's UI.
///
/// Prompts wait for the user without a timeout. `None` means the prompt was
/// dismissed without a choice.
#[async_trait]
pub trait HostUi: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);

    /// Shows `message` with one button per entry of `choices` and returns the
    /// chosen entry.
    async fn prompt(&self, severity: Severity, message: &str, choices: &[String])
        -> Option<String>;

    /// Lets the user pick one of `items`.
    async fn quick_pick(&self, items: &[String]) -> Option<String>;

    /// Opens a read-only virtual document; its content is requested from the
    /// host afterwards.
    fn open_document(&self, uri: &str);

    /// Starts a non-cancellable progress notification.
    fn start_progress(&self, title: &str) -> ProgressId;

    fn finish_progress(&self, id: ProgressId);

    fn plugin_state_changed(&self, _plugin_dir: &Path, _state: PluginState) {}

    fn show_error(&self, message: &str) {
        self.notify(Severity::Error, message);
    }
}

/// Keeps a progress notification open until dropped.
pub struct ProgressGuard {
    ui: Arc<dyn HostUi>,
    id: ProgressId,
}

impl ProgressGuard {
    pub fn start(ui: Arc<dyn HostUi>, title: &str) -> Self {
        let id = ui.start_progress(title);
        Self { ui, id }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.ui.finish_progress(self.id);
    }
}
