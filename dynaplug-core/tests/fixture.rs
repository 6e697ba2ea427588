use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dynaplug_core::{
    host::{mock::RecordingUi, HostActor, HostEvent},
    plugin::{
        ActivationContext, Diagnostics, InProcessLoader, ModuleError, PluginModule,
        PluginServices, WorkspaceRegistry,
    },
    process::mock::MockProcessRunner,
    settings::{Settings, SettingsManager},
    watch::ManualWatchService,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Counters shared by every instance a [`CountingModule`] factory creates.
#[derive(Clone, Default)]
pub struct Counters {
    pub created: Arc<AtomicUsize>,
    pub activated: Arc<AtomicUsize>,
    pub deactivated: Arc<AtomicUsize>,
    pub disposed: Arc<AtomicUsize>,
    /// Instances activated and not yet deactivated.
    pub live: Arc<AtomicUsize>,
    /// Size of the resource list each activation started with.
    pub resources_at_activation: Arc<std::sync::Mutex<Vec<usize>>>,
}

/// Ordered record of lifecycle calls across module versions.
pub type CallLog = Arc<std::sync::Mutex<Vec<String>>>;

pub struct CountingModule {
    counters: Counters,
    tag: &'static str,
    log: CallLog,
}

impl PluginModule for CountingModule {
    fn activate(&mut self, context: &mut ActivationContext) -> Result<(), ModuleError> {
        self.counters
            .resources_at_activation
            .lock()
            .unwrap()
            .push(context.len());
        self.counters.activated.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("activate {}", self.tag));
        let disposed = self.counters.disposed.clone();
        let log = self.log.clone();
        let tag = self.tag;
        context.push(move || {
            disposed.fetch_add(1, Ordering::SeqCst);
            log.lock().unwrap().push(format!("dispose {tag}"));
        });
        Ok(())
    }

    fn deactivate(&mut self, _context: &mut ActivationContext) -> Result<(), ModuleError> {
        self.counters.deactivated.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("deactivate {}", self.tag));
        Ok(())
    }
}

/// A workspace tree in a temporary directory with mock collaborators.
pub struct Fixture {
    pub workspace_dir: TempDir,
    pub runner: MockProcessRunner,
    pub ui: Arc<RecordingUi>,
    pub loader: Arc<InProcessLoader>,
    pub watcher: ManualWatchService,
    pub diagnostics: Arc<Diagnostics>,
    pub settings: SettingsManager,
}

impl Fixture {
    pub fn new(base_directories: &[&str]) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let workspace_dir = TempDir::new().unwrap();
        let settings_path = workspace_dir.path().join(".dynaplug").join("settings.toml");
        let settings = SettingsManager::from_path(settings_path).unwrap();
        settings
            .save_settings(Settings {
                base_directories: base_directories.iter().map(|d| d.to_string()).collect(),
                ..Settings::default()
            })
            .unwrap();

        Fixture {
            workspace_dir,
            runner: MockProcessRunner::new(),
            ui: Arc::new(RecordingUi::new()),
            loader: Arc::new(InProcessLoader::new()),
            watcher: ManualWatchService::new(),
            diagnostics: Arc::new(Diagnostics::new()),
            settings,
        }
    }

    /// A workspace root inside the temporary directory, created on demand.
    pub fn root(&self, name: &str) -> PathBuf {
        let root = self.workspace_dir.path().join(name);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    pub fn services(&self) -> PluginServices {
        PluginServices {
            runner: Arc::new(self.runner.clone()),
            ui: self.ui.clone(),
            loader: self.loader.clone(),
            watcher: Arc::new(self.watcher.clone()),
            diagnostics: self.diagnostics.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn registry(&self) -> WorkspaceRegistry {
        WorkspaceRegistry::new(self.services())
    }

    /// Lays out a plugin directory with a manifest, a source file and,
    /// when `installed`, a dependency directory.
    pub fn plugin_dir(&self, root: &Path, directory: &str, installed: bool) -> PathBuf {
        let dir = root.join(directory);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), r#"{"name":"plugin"}"#).unwrap();
        std::fs::write(dir.join("plugin.ts"), "export function activate() {}").unwrap();
        if installed {
            std::fs::create_dir_all(dir.join("node_modules")).unwrap();
        }
        dir
    }

    /// Publishes a counting module at the compiled entry point of `dir`.
    pub fn publish(&self, dir: &Path) -> Counters {
        self.publish_tagged(dir, "v1", &CallLog::default())
    }

    /// Publishes a counting module that records its calls as `<call> <tag>`
    /// in `log`. Publishing again models a recompilation.
    pub fn publish_tagged(&self, dir: &Path, tag: &'static str, log: &CallLog) -> Counters {
        let counters = Counters::default();
        let shared = counters.clone();
        let log = log.clone();
        self.loader.publish(dir.join("out/plugin.js"), move || {
            shared.created.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingModule {
                counters: shared.clone(),
                tag,
                log: log.clone(),
            })
        });
        counters
    }

    #[allow(dead_code)]
    pub fn actor(&self, roots: Vec<PathBuf>) -> (HostActor, mpsc::UnboundedReceiver<HostEvent>) {
        HostActor::builder()
            .workspace_roots(roots)
            .trusted(true)
            .settings_path(self.settings.path().to_path_buf())
            .runner(Arc::new(self.runner.clone()))
            .loader(self.loader.clone())
            .watcher(Arc::new(self.watcher.clone()))
            .build()
            .unwrap()
    }
}

/// Waits for the first event matching `predicate`, returning it.
#[allow(dead_code)]
pub async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<HostEvent>,
    predicate: impl Fn(&HostEvent) -> bool,
) -> HostEvent {
    loop {
        match rx.recv().await {
            Some(event) if predicate(&event) => return event,
            Some(_) => {}
            None => panic!("Event channel closed"),
        }
    }
}

#[allow(dead_code)]
pub fn run<F, Fut>(test_fn: F)
where
    F: FnOnce(Fixture) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    run_with_directories(&["hooks"], test_fn)
}

pub fn run_with_directories<F, Fut>(base_directories: &[&str], test_fn: F)
where
    F: FnOnce(Fixture) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    use tokio::time::{timeout, Duration};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    let local = tokio::task::LocalSet::new();

    runtime.block_on(local.run_until(async {
        let fixture = Fixture::new(base_directories);
        let test_future = test_fn(fixture);
        timeout(Duration::from_secs(30), test_future)
            .await
            .expect("Test timed out after 30 seconds");
    }));
}

/// Like [`run`], with a paused clock so debounce delays elapse instantly.
#[allow(dead_code)]
pub fn run_paused<F, Fut>(test_fn: F)
where
    F: FnOnce(Fixture) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("Failed to create tokio runtime");

    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(test_fn(Fixture::new(&["hooks"]))));
}
