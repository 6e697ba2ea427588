//! A [`HostUi`] that records everything and answers prompts from a script.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::ui::{HostUi, ProgressId, Severity};
use crate::plugin::PluginState;

#[derive(Debug, Default)]
struct Recorded {
    notifications: Vec<(Severity, String)>,
    prompts: Vec<(String, Vec<String>)>,
    picks: Vec<Vec<String>>,
    documents: Vec<String>,
    progress: Vec<String>,
    open_progress: HashSet<ProgressId>,
    states: Vec<(PathBuf, PluginState)>,
    answers: VecDeque<Option<String>>,
}

#[derive(Debug, Default)]
pub struct RecordingUi {
    recorded: Mutex<Recorded>,
    next_progress: AtomicU64,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer for the next prompt or quick pick. Unscripted
    /// prompts are dismissed.
    pub fn answer(&self, choice: Option<&str>) {
        self.lock().answers.push_back(choice.map(str::to_string));
    }

    pub fn notifications(&self) -> Vec<(Severity, String)> {
        self.lock().notifications.clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .notifications
            .iter()
            .filter(|(severity, _)| *severity == Severity::Error)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Messages of every prompt shown so far.
    pub fn prompts(&self) -> Vec<String> {
        self.lock()
            .prompts
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub fn prompt_choices(&self) -> Vec<Vec<String>> {
        self.lock()
            .prompts
            .iter()
            .map(|(_, choices)| choices.clone())
            .collect()
    }

    pub fn picks(&self) -> Vec<Vec<String>> {
        self.lock().picks.clone()
    }

    pub fn documents(&self) -> Vec<String> {
        self.lock().documents.clone()
    }

    pub fn progress_titles(&self) -> Vec<String> {
        self.lock().progress.clone()
    }

    /// Number of progress notifications started but not yet finished.
    pub fn open_progress(&self) -> usize {
        self.lock().open_progress.len()
    }

    pub fn states_of(&self, plugin_dir: &Path) -> Vec<PluginState> {
        self.lock()
            .states
            .iter()
            .filter(|(dir, _)| dir == plugin_dir)
            .map(|(_, state)| *state)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_answer(&self) -> Option<String> {
        self.lock().answers.pop_front().flatten()
    }
}

#[async_trait]
impl HostUi for RecordingUi {
    fn notify(&self, severity: Severity, message: &str) {
        self.lock()
            .notifications
            .push((severity, message.to_string()));
    }

    async fn prompt(
        &self,
        _severity: Severity,
        message: &str,
        choices: &[String],
    ) -> Option<String> {
        self.lock()
            .prompts
            .push((message.to_string(), choices.to_vec()));
        self.next_answer()
    }

    async fn quick_pick(&self, items: &[String]) -> Option<String> {
        self.lock().picks.push(items.to_vec());
        self.next_answer()
    }

    fn open_document(&self, uri: &str) {
        self.lock().documents.push(uri.to_string());
    }

    fn start_progress(&self, title: &str) -> ProgressId {
        let id = self.next_progress.fetch_add(1, Ordering::Relaxed);
        let mut recorded = self.lock();
        recorded.progress.push(title.to_string());
        recorded.open_progress.insert(id);
        id
    }

    fn finish_progress(&self, id: ProgressId) {
        self.lock().open_progress.remove(&id);
    }

    fn plugin_state_changed(&self, plugin_dir: &Path, state: PluginState) {
        self.lock()
            .states
            .push((plugin_dir.to_path_buf(), state));
    }
}
