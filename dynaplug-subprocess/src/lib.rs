use anyhow::anyhow;
use dynaplug_core::host::{HostActor, HostMessage};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::{io, io::AsyncWriteExt};
use tracing::{info, warn};

/// Options the editor passes when it spawns the host process.
#[derive(Debug, Clone, Default)]
pub struct SubprocessOptions {
    pub workspace_roots: Vec<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub trusted: bool,
}

/// Runs the host actor with one JSON-encoded message per stdin line and one
/// JSON-encoded event per stdout line. Returns after stdin closes (or a
/// `Shutdown` message arrives) and every plugin is unloaded.
///
/// Must run inside a `LocalSet`.
pub async fn run_subprocess(options: SubprocessOptions) -> anyhow::Result<()> {
    let mut builder = HostActor::builder()
        .workspace_roots(options.workspace_roots)
        .trusted(options.trusted);
    if let Some(path) = options.settings_path {
        builder = builder.settings_path(path);
    }
    let (host_actor, mut event_rx) = builder.build()?;

    let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();

    join_set.spawn(async move {
        let mut stdout = io::stdout();
        while let Some(event) = event_rx.recv().await {
            let json = serde_json::to_string(&event)?;
            let json = format!("{json}\n");
            stdout.write_all(json.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok(())
    });

    join_set.spawn(async move {
        let mut stdin = BufReader::new(io::stdin()).lines();
        while let Some(line) = stdin.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message: HostMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Ignoring malformed message: {e}");
                    continue;
                }
            };
            if matches!(message, HostMessage::Shutdown) {
                break;
            }
            host_actor.tx.send(message)?;
        }
        // Closing stdin without an explicit shutdown still unloads plugins.
        info!("Input closed, shutting down plugins");
        host_actor.shutdown()?;
        Ok(())
    });

    // The output pump ends once the actor has finished shutting down and
    // dropped every event sender.
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(anyhow!(e)),
            Err(panic) => return Err(anyhow!(panic)),
        }
    }
    Ok(())
}
