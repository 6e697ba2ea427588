use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::channel::ChannelUi;
use super::events::{EventSender, HostEvent, HostMessage};
use super::ui::HostUi;
use crate::binary::BinaryResolver;
use crate::plugin::diagnostics::DOCUMENT_SCHEME;
use crate::plugin::native::NativeModuleLoader;
use crate::plugin::{Diagnostics, ModuleLoader, PluginServices, WorkspaceRegistry};
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::settings::{Settings, SettingsManager, Tool};
use crate::watch::{NotifyWatchService, WatchService};

/// The root controller: owns the settings, the diagnostics record, the
/// collaborators and the workspace registry for one editor session.
pub struct PluginHost {
    services: PluginServices,
    resolver: BinaryResolver,
    registry: WorkspaceRegistry,
    started: AtomicBool,
}

impl PluginHost {
    pub fn new(services: PluginServices, resolver: BinaryResolver) -> Self {
        Self {
            registry: WorkspaceRegistry::new(services.clone()),
            services,
            resolver,
            started: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &WorkspaceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.services.settings
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.services.diagnostics
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Enables plugins for `roots`. Refuses untrusted workspaces and stops
    /// when a required tool is unavailable. Returns whether plugins were
    /// enabled.
    pub async fn start(&self, roots: &[PathBuf], trusted: bool) -> Result<bool> {
        let ui: &dyn HostUi = self.services.ui.as_ref();
        if !trusted {
            warn!("Workspace is not trusted, dynamic plugins stay disabled");
            ui.show_error("Refusing to enable dynamic plugins due to untrusted workspace");
            return Ok(false);
        }

        for tool in Tool::ALL {
            let works = self
                .resolver
                .ensure_command_works(
                    tool,
                    self.services.runner.as_ref(),
                    ui,
                    &self.services.settings,
                )
                .await?;
            if !works {
                error!(tool = tool.default_binary(), "Required tool is not available");
                return Ok(false);
            }
        }

        self.started.store(true, Ordering::SeqCst);
        info!(roots = roots.len(), "Dynamic plugins enabled");
        for root in roots {
            self.registry.register_workspace(root).await;
        }
        Ok(true)
    }

    /// Content of the virtual document at `uri`, rendered from the current
    /// failure record.
    pub fn read_document(&self, uri: &str) -> Option<String> {
        let scheme = uri.split_once(':').map(|(scheme, _)| scheme)?;
        (scheme == DOCUMENT_SCHEME).then(|| self.services.diagnostics.render())
    }

    /// Handles one message and returns the reply event, if the message has
    /// one. Prompt responses are not handled here; they belong to the UI
    /// that asked.
    pub async fn handle(&self, message: HostMessage) -> Result<Option<HostEvent>> {
        match message {
            HostMessage::WorkspaceFoldersChanged { added, removed } => {
                if self.ensure_started() {
                    self.registry
                        .workspace_folders_changed(&added, &removed)
                        .await;
                }
                Ok(None)
            }
            HostMessage::ReloadPlugins => {
                if self.ensure_started() {
                    self.registry.reload_plugins().await;
                }
                Ok(None)
            }
            HostMessage::ReadDocument { uri } => match self.read_document(&uri) {
                Some(content) => Ok(Some(HostEvent::DocumentContent { uri, content })),
                None => Ok(Some(HostEvent::Error(format!("Unknown document {uri}")))),
            },
            HostMessage::GetSettings => {
                let settings = serde_json::to_value(self.services.settings.settings())
                    .context("Failed to serialize settings")?;
                Ok(Some(HostEvent::Settings(settings)))
            }
            HostMessage::SaveSettings { settings } => {
                let new_settings: Settings =
                    serde_json::from_value(settings).context("Failed to deserialize settings")?;
                self.services.settings.save_settings(new_settings)?;
                Ok(None)
            }
            HostMessage::PromptResponse { id, .. } => {
                warn!(id, "Prompt response reached the host controller");
                Ok(None)
            }
            HostMessage::Shutdown => {
                self.registry.shutdown().await;
                Ok(None)
            }
        }
    }

    fn ensure_started(&self) -> bool {
        let started = self.is_started();
        if !started {
            warn!("Ignoring plugin command, dynamic plugins are not enabled");
        }
        started
    }
}

/// The `HostActor` is the backend the editor talks to.
///
/// The interface is two channels: [`HostMessage`]s go in through `tx` and
/// [`HostEvent`]s come out of the receiver returned by
/// [`HostActorBuilder::build`]. Prompt responses, document reads and
/// settings requests are answered right away, even while a long operation
/// (compiling, installing) is running; plugin operations run one at a time
/// in arrival order.
pub struct HostActor {
    pub tx: mpsc::UnboundedSender<HostMessage>,
}

impl HostActor {
    pub fn builder() -> HostActorBuilder {
        HostActorBuilder::default()
    }

    pub fn send(&self, message: HostMessage) -> Result<()> {
        self.tx.send(message)?;
        Ok(())
    }

    pub fn reload_plugins(&self) -> Result<()> {
        self.send(HostMessage::ReloadPlugins)
    }

    pub fn respond(&self, id: u64, choice: Option<&str>) -> Result<()> {
        self.send(HostMessage::PromptResponse {
            id,
            choice: choice.map(str::to_string),
        })
    }

    pub fn read_document(&self, uri: impl Into<String>) -> Result<()> {
        self.send(HostMessage::ReadDocument { uri: uri.into() })
    }

    pub fn get_settings(&self) -> Result<()> {
        self.send(HostMessage::GetSettings)
    }

    pub fn save_settings(&self, settings: serde_json::Value) -> Result<()> {
        self.send(HostMessage::SaveSettings { settings })
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(HostMessage::Shutdown)
    }
}

/// Builds a [`HostActor`]. Every collaborator defaults to the production
/// implementation.
#[derive(Default)]
pub struct HostActorBuilder {
    workspace_roots: Vec<PathBuf>,
    trusted: bool,
    settings_path: Option<PathBuf>,
    runner: Option<Arc<dyn ProcessRunner>>,
    loader: Option<Arc<dyn ModuleLoader>>,
    watcher: Option<Arc<dyn WatchService>>,
    resolver: Option<BinaryResolver>,
}

impl HostActorBuilder {
    pub fn workspace_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.workspace_roots = roots;
        self
    }

    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn watcher(mut self, watcher: Arc<dyn WatchService>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn resolver(mut self, resolver: BinaryResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// An explicit path wins, then the first workspace root, then the home
    /// directory when the session has no roots.
    fn settings_manager(&self) -> Result<SettingsManager> {
        match (&self.settings_path, self.workspace_roots.first()) {
            (Some(path), _) => SettingsManager::from_path(path.clone()),
            (None, Some(root)) => {
                SettingsManager::from_path(SettingsManager::workspace_settings_path(root))
            }
            (None, None) => SettingsManager::new(),
        }
    }

    /// Launches the actor on the current `LocalSet` and returns a handle to
    /// it with the event receiver.
    pub fn build(self) -> Result<(HostActor, mpsc::UnboundedReceiver<HostEvent>)> {
        let settings = self.settings_manager()?;

        let (events, event_rx) = EventSender::new();
        let ui = Arc::new(ChannelUi::new(events.clone()));
        let runner: Arc<dyn ProcessRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(SystemProcessRunner::new(ui.clone())),
        };
        let loader: Arc<dyn ModuleLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(NativeModuleLoader::new()),
        };
        let watcher: Arc<dyn WatchService> = match self.watcher {
            Some(watcher) => watcher,
            None => Arc::new(NotifyWatchService::new()),
        };

        let services = PluginServices {
            runner,
            ui: ui.clone(),
            loader,
            watcher,
            diagnostics: Arc::new(Diagnostics::new()),
            settings,
        };
        let host = Arc::new(PluginHost::new(
            services,
            self.resolver.unwrap_or_else(BinaryResolver::from_env),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        tokio::task::spawn_local(run_worker(
            host.clone(),
            events.clone(),
            work_rx,
            self.workspace_roots,
            self.trusted,
        ));
        tokio::task::spawn_local(run_actor(host, ui, events, rx, work_tx));

        Ok((HostActor { tx }, event_rx))
    }
}

/// Answers the quick messages and forwards plugin operations to the worker.
async fn run_actor(
    host: Arc<PluginHost>,
    ui: Arc<ChannelUi>,
    events: EventSender,
    mut rx: mpsc::UnboundedReceiver<HostMessage>,
    work_tx: mpsc::UnboundedSender<HostMessage>,
) {
    info!("HostActor started");

    while let Some(message) = rx.recv().await {
        match message {
            HostMessage::PromptResponse { id, choice } => {
                if !ui.resolve(id, choice) {
                    warn!(id, "Response for a prompt that is not waiting");
                }
            }
            message @ (HostMessage::ReadDocument { .. }
            | HostMessage::GetSettings
            | HostMessage::SaveSettings { .. }) => dispatch(&host, &events, message).await,
            message => {
                if work_tx.send(message).is_err() {
                    break;
                }
            }
        }
    }
    let dismissed = ui.dismiss_all();
    if dismissed > 0 {
        warn!(dismissed, "Host went away with prompts still open");
    }
    info!("HostActor stopped");
}

/// Starts the host, then runs plugin operations one at a time.
async fn run_worker(
    host: Arc<PluginHost>,
    events: EventSender,
    mut work_rx: mpsc::UnboundedReceiver<HostMessage>,
    workspace_roots: Vec<PathBuf>,
    trusted: bool,
) {
    if let Err(e) = host.start(&workspace_roots, trusted).await {
        error!(?e, "Failed to start plugin host");
        events.error(format!("Failed to start dynamic plugins: {e:#}"));
    }

    while let Some(message) = work_rx.recv().await {
        let shutdown = matches!(message, HostMessage::Shutdown);
        dispatch(&host, &events, message).await;
        if shutdown {
            info!("Plugin host shut down");
            break;
        }
    }
}

async fn dispatch(host: &PluginHost, events: &EventSender, message: HostMessage) {
    match host.handle(message).await {
        Ok(Some(event)) => events.send(event),
        Ok(None) => {}
        Err(e) => {
            error!(?e, "Error processing message");
            events.error(format!("Error: {e:#}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::RecordingUi;
    use crate::plugin::InProcessLoader;
    use crate::process::mock::MockProcessRunner;
    use crate::watch::ManualWatchService;
    use tempfile::TempDir;

    fn host(temp: &TempDir) -> (PluginHost, Arc<RecordingUi>, MockProcessRunner) {
        let ui = Arc::new(RecordingUi::new());
        let runner = MockProcessRunner::new();
        let services = PluginServices {
            runner: Arc::new(runner.clone()),
            ui: ui.clone(),
            loader: Arc::new(InProcessLoader::new()),
            watcher: Arc::new(ManualWatchService::new()),
            diagnostics: Arc::new(Diagnostics::new()),
            settings: SettingsManager::from_path(temp.path().join("settings.toml")).unwrap(),
        };
        (
            PluginHost::new(services, BinaryResolver::with_search_path("")),
            ui,
            runner,
        )
    }

    #[tokio::test]
    async fn test_untrusted_workspace_is_refused() {
        let temp = TempDir::new().unwrap();
        let (host, ui, runner) = host(&temp);

        let started = host.start(&[temp.path().to_path_buf()], false).await.unwrap();

        assert!(!started);
        assert!(!host.is_started());
        assert_eq!(
            ui.errors(),
            vec!["Refusing to enable dynamic plugins due to untrusted workspace"]
        );
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_probes_both_tools() {
        let temp = TempDir::new().unwrap();
        let (host, _ui, runner) = host(&temp);

        assert!(host.start(&[], true).await.unwrap());
        assert_eq!(runner.call_count("tsc -h"), 1);
        assert_eq!(runner.call_count("npm help"), 1);
    }

    #[tokio::test]
    async fn test_read_document_only_serves_diagnostic_scheme() {
        let temp = TempDir::new().unwrap();
        let (host, _ui, _runner) = host(&temp);

        assert_eq!(
            host.read_document("dwe:hooks failed to compile").as_deref(),
            Some("Unknown error (no log)")
        );
        assert_eq!(host.read_document("file:///etc/passwd"), None);
        assert_eq!(host.read_document("no-scheme"), None);
    }

    #[tokio::test]
    async fn test_commands_before_start_are_ignored() {
        let temp = TempDir::new().unwrap();
        let (host, _ui, runner) = host(&temp);

        let reply = host.handle(HostMessage::ReloadPlugins).await.unwrap();

        assert_eq!(reply, None);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_settings_round_trip_through_messages() {
        let temp = TempDir::new().unwrap();
        let (host, _ui, _runner) = host(&temp);

        let Some(HostEvent::Settings(mut value)) =
            host.handle(HostMessage::GetSettings).await.unwrap()
        else {
            panic!("expected settings");
        };
        value["base_directories"] = serde_json::json!(["hooks"]);
        host.handle(HostMessage::SaveSettings { settings: value })
            .await
            .unwrap();

        assert_eq!(host.settings().settings().base_directories, vec!["hooks"]);
        let saved = SettingsManager::from_path(temp.path().join("settings.toml")).unwrap();
        assert_eq!(saved.settings().base_directories, vec!["hooks"]);
    }

    #[test]
    fn test_settings_default_to_first_workspace_root() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");

        let settings = HostActor::builder()
            .workspace_roots(vec![first.clone(), second.clone()])
            .settings_manager()
            .unwrap();

        let expected = first.join(".dynaplug").join("settings.toml");
        assert_eq!(settings.path(), expected.as_path());
        assert!(expected.exists());
        assert!(!second.join(".dynaplug").exists());
    }

    #[test]
    fn test_explicit_settings_path_overrides_workspace() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ws");
        let explicit = temp.path().join("custom.toml");

        let settings = HostActor::builder()
            .workspace_roots(vec![root.clone()])
            .settings_path(explicit.clone())
            .settings_manager()
            .unwrap();

        assert_eq!(settings.path(), explicit.as_path());
        assert!(!root.join(".dynaplug").exists());
    }
}
