//! A [`HostUi`] that talks to the editor through [`HostEvent`]s.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use super::events::{EventSender, HostEvent};
use super::ui::{HostUi, ProgressId, Severity};
use crate::plugin::PluginState;

/// Emits UI requests as events. Prompts and quick picks park until the
/// matching [`resolve`](ChannelUi::resolve) call delivers the user's answer.
pub struct ChannelUi {
    events: EventSender,
    next_prompt: AtomicU64,
    next_progress: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Option<String>>>>,
}

impl ChannelUi {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_prompt: AtomicU64::new(1),
            next_progress: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers the answer to prompt `id`. Returns `false` when no such
    /// prompt is waiting.
    pub fn resolve(&self, id: u64, choice: Option<String>) -> bool {
        let sender = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match sender {
            Some(sender) => sender.send(choice).is_ok(),
            None => false,
        }
    }

    /// Dismisses every waiting prompt. Returns how many were waiting.
    pub fn dismiss_all(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn pending_prompts(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn ask(&self, event: impl FnOnce(u64) -> HostEvent) -> Option<String> {
        let id = self.next_prompt.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        self.events.send(event(id));
        debug!(id, "Waiting for user response");
        // A dropped sender means the editor went away; treat it as dismissed.
        rx.await.ok().flatten()
    }
}

#[async_trait]
impl HostUi for ChannelUi {
    fn notify(&self, severity: Severity, message: &str) {
        self.events.send(HostEvent::Notification {
            severity,
            message: message.to_string(),
        });
    }

    async fn prompt(
        &self,
        severity: Severity,
        message: &str,
        choices: &[String],
    ) -> Option<String> {
        self.ask(|id| HostEvent::Prompt {
            id,
            severity,
            message: message.to_string(),
            choices: choices.to_vec(),
        })
        .await
    }

    async fn quick_pick(&self, items: &[String]) -> Option<String> {
        self.ask(|id| HostEvent::QuickPick {
            id,
            items: items.to_vec(),
        })
        .await
    }

    fn open_document(&self, uri: &str) {
        self.events.send(HostEvent::OpenDocument {
            uri: uri.to_string(),
        });
    }

    fn start_progress(&self, title: &str) -> ProgressId {
        let id = self.next_progress.fetch_add(1, Ordering::Relaxed);
        self.events.send(HostEvent::ProgressStarted {
            id,
            title: title.to_string(),
        });
        id
    }

    fn finish_progress(&self, id: ProgressId) {
        self.events.send(HostEvent::ProgressFinished { id });
    }

    fn plugin_state_changed(&self, plugin_dir: &Path, state: PluginState) {
        self.events.send(HostEvent::PluginStateChanged {
            plugin_dir: plugin_dir.to_path_buf(),
            state,
        });
    }
}
