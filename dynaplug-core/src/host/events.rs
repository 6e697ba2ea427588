use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ui::{ProgressId, Severity};
use crate::plugin::PluginState;

/// Messages the host editor sends to dynaplug, the input of the actor.
///
/// These derive serde for use across processes: the editor spawns
/// `dynaplug` and writes one JSON-encoded message per line to its stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    /// Workspace roots were opened or closed. Removals are applied first.
    WorkspaceFoldersChanged {
        #[serde(default)]
        added: Vec<PathBuf>,
        #[serde(default)]
        removed: Vec<PathBuf>,
    },

    /// The "reload all plugins" command
    ReloadPlugins,

    /// The editor needs the content of a virtual document it was told to open
    ReadDocument { uri: String },

    /// The user answered a `Prompt` or `QuickPick` event. `choice` is absent
    /// when the dialog was dismissed.
    PromptResponse { id: u64, choice: Option<String> },

    /// Sends the current settings back as a `Settings` event
    GetSettings,
    SaveSettings { settings: serde_json::Value },

    /// Unload every plugin and stop
    Shutdown,
}

/// Events dynaplug sends to the host editor, the output of the actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum HostEvent {
    Notification {
        severity: Severity,
        message: String,
    },
    /// Show `message` with one button per choice and answer with a
    /// `PromptResponse` carrying the same `id`.
    Prompt {
        id: u64,
        severity: Severity,
        message: String,
        choices: Vec<String>,
    },
    QuickPick {
        id: u64,
        items: Vec<String>,
    },
    ProgressStarted {
        id: ProgressId,
        title: String,
    },
    ProgressFinished {
        id: ProgressId,
    },
    /// Open the read-only virtual document at `uri`
    OpenDocument {
        uri: String,
    },
    DocumentContent {
        uri: String,
        content: String,
    },
    Settings(serde_json::Value),
    PluginStateChanged {
        plugin_dir: PathBuf,
        state: PluginState,
    },
    Error(String),
}

/// A small wrapper over the event channel for convenience.
#[derive(Debug, Clone)]
pub struct EventSender {
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl EventSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, rx) = mpsc::unbounded_channel();
        (Self { event_tx }, rx)
    }

    /// Sends `event`. Events sent after the receiver is gone are dropped.
    pub fn send(&self, event: HostEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(HostEvent::Error(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_are_tagged_with_kind_and_data() {
        let event = HostEvent::PluginStateChanged {
            plugin_dir: PathBuf::from("/ws/hooks"),
            state: PluginState::CompileFailed,
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "kind": "PluginStateChanged",
                "data": { "plugin_dir": "/ws/hooks", "state": "compile_failed" }
            })
        );
    }

    #[test]
    fn test_messages_parse_from_json_lines() {
        let message: HostMessage =
            serde_json::from_str(r#"{"WorkspaceFoldersChanged":{"added":["/ws/a"]}}"#).unwrap();
        assert_eq!(
            message,
            HostMessage::WorkspaceFoldersChanged {
                added: vec![PathBuf::from("/ws/a")],
                removed: vec![],
            }
        );

        let message: HostMessage = serde_json::from_str(r#""ReloadPlugins""#).unwrap();
        assert_eq!(message, HostMessage::ReloadPlugins);

        let message: HostMessage =
            serde_json::from_str(r#"{"PromptResponse":{"id":3,"choice":null}}"#).unwrap();
        assert_eq!(message, HostMessage::PromptResponse { id: 3, choice: None });
    }
}
