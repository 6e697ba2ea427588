//! The most recent compilation failure and the virtual document that shows it.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::process::ShellOutput;

/// URI scheme of diagnostic documents.
pub const DOCUMENT_SCHEME: &str = "dwe";

/// URI of the diagnostic document for the plugin in `plugin_dir`.
pub fn document_uri(plugin_dir: &Path) -> String {
    let name = plugin_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| plugin_dir.display().to_string());
    format!("{DOCUMENT_SCHEME}:{name} failed to compile")
}

/// Holds the single most recent compilation failure across all plugins.
/// A successful compile does not clear it.
#[derive(Debug, Default)]
pub struct Diagnostics {
    last_failure: Mutex<Option<ShellOutput>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, output: ShellOutput) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
    }

    pub fn last_failure(&self) -> Option<ShellOutput> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Renders the document content from the record as it is right now.
    pub fn render(&self) -> String {
        let Some(output) = self.last_failure() else {
            return "Unknown error (no log)".to_string();
        };
        let cause = output
            .error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        format!(
            "\nCommand failed: {}\n\nError: {}\n\nstdout:\n{}\n\nstderr:\n{}",
            output.command, cause, output.stdout, output.stderr
        )
    }
}
