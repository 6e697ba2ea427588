//! Source tree watching.
//!
//! A [`WatchService`] reports changes to files under a root that match a
//! [`WatchPattern`]. Watches stay live for as long as the returned
//! [`WatchHandle`] is held.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which files under a watched root count as sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPattern {
    /// File extensions without the leading dot.
    pub extensions: Vec<String>,
    /// Subtrees whose changes are ignored (build output, installed
    /// dependencies).
    pub excluded: Vec<PathBuf>,
}

impl WatchPattern {
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
            excluded: Vec::new(),
        }
    }

    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.excluded.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted == ext))
    }

    /// Glob-style rendering for logs, e.g. `**/*.{ts}`.
    pub fn describe(&self) -> String {
        format!("**/*.{{{}}}", self.extensions.join(","))
    }
}

pub type ChangeCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Keeps a watch registered. Dropping it stops change delivery.
pub struct WatchHandle {
    root: PathBuf,
    _guard: Box<dyn Send>,
}

impl WatchHandle {
    pub fn new(root: PathBuf, guard: impl Send + 'static) -> Self {
        Self {
            root,
            _guard: Box::new(guard),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

pub trait WatchService: Send + Sync {
    /// Watches `root` recursively and calls `on_change` with the path of each
    /// changed file matching `pattern`.
    fn watch(
        &self,
        root: &Path,
        pattern: WatchPattern,
        on_change: ChangeCallback,
    ) -> Result<WatchHandle>;
}

/// Filesystem watcher backed by `notify`.
///
/// Events arrive on the watcher's own thread and are forwarded over a channel
/// to a task on the current tokio runtime, which invokes the callback.
#[derive(Debug, Default)]
pub struct NotifyWatchService;

impl NotifyWatchService {
    pub fn new() -> Self {
        Self
    }
}

struct NotifyGuard {
    _watcher: notify::RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl WatchService for NotifyWatchService {
    fn watch(
        &self,
        root: &Path,
        pattern: WatchPattern,
        on_change: ChangeCallback,
    ) -> Result<WatchHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            for path in event.paths {
                                let _ = tx.send(path);
                            }
                        }
                    }
                    Err(e) => warn!("File watcher error: {e}"),
                }
            })
            .context("Failed to create file watcher")?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        let forwarder = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                if pattern.matches(&path) {
                    debug!(path = %path.display(), "Source file changed");
                    on_change(path);
                }
            }
        });

        Ok(WatchHandle::new(
            root.to_path_buf(),
            NotifyGuard {
                _watcher: watcher,
                forwarder,
            },
        ))
    }
}

struct Registration {
    id: u64,
    root: PathBuf,
    pattern: WatchPattern,
    on_change: ChangeCallback,
}

#[derive(Default)]
struct Registrations {
    next_id: u64,
    active: Vec<Registration>,
}

/// A watch service driven by explicit [`touch`](ManualWatchService::touch)
/// calls instead of the filesystem.
#[derive(Clone, Default)]
pub struct ManualWatchService {
    registrations: Arc<Mutex<Registrations>>,
}

struct ManualGuard {
    id: u64,
    registrations: Arc<Mutex<Registrations>>,
}

impl Drop for ManualGuard {
    fn drop(&mut self) {
        lock(&self.registrations)
            .active
            .retain(|registration| registration.id != self.id);
    }
}

fn lock(registrations: &Mutex<Registrations>) -> MutexGuard<'_, Registrations> {
    registrations.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualWatchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a change to `path` and returns how many watches were notified.
    pub fn touch(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let callbacks: Vec<ChangeCallback> = lock(&self.registrations)
            .active
            .iter()
            .filter(|r| path.starts_with(&r.root) && r.pattern.matches(path))
            .map(|r| Arc::clone(&r.on_change))
            .collect();
        for callback in &callbacks {
            callback(path.to_path_buf());
        }
        callbacks.len()
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.registrations).active.len()
    }
}

impl WatchService for ManualWatchService {
    fn watch(
        &self,
        root: &Path,
        pattern: WatchPattern,
        on_change: ChangeCallback,
    ) -> Result<WatchHandle> {
        let mut registrations = lock(&self.registrations);
        let id = registrations.next_id;
        registrations.next_id += 1;
        registrations.active.push(Registration {
            id,
            root: root.to_path_buf(),
            pattern,
            on_change,
        });
        Ok(WatchHandle::new(
            root.to_path_buf(),
            ManualGuard {
                id,
                registrations: Arc::clone(&self.registrations),
            },
        ))
    }
}
