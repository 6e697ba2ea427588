use anyhow::Result;
use clap::Parser;
use dynaplug_subprocess::{run_subprocess, SubprocessOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dynaplug")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "dynaplug - compiles, loads and hot-reloads workspace plugins for an editor")]
struct Args {
    /// Workspace roots (for multi-root workspaces)
    #[arg(long, value_delimiter = ',')]
    workspace_roots: Vec<PathBuf>,

    /// Load settings from this file instead of <first root>/.dynaplug/settings.toml
    #[arg(long, value_name = "PATH")]
    settings_path: Option<PathBuf>,

    /// The editor trusts the workspace; without this no plugin code runs
    #[arg(long)]
    trusted: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing()?;

    info!(
        "Host startup: roots={:?}, settings_path={:?}, trusted={}",
        args.workspace_roots, args.settings_path, args.trusted
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(run_subprocess(SubprocessOptions {
                workspace_roots: args.workspace_roots,
                settings_path: args.settings_path,
                trusted: args.trusted,
            }))
            .await
    })
}

/// Logs go to a file; stdout carries the protocol.
fn setup_tracing() -> Result<()> {
    use std::fs;
    use tracing_subscriber::fmt;

    let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let trace_dir = home.join(".dynaplug").join("trace");
    fs::create_dir_all(&trace_dir)?;

    let log_file = trace_dir.join("dynaplug.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter)
        .init();

    info!("Tracing initialized to {:?}", log_file);
    Ok(())
}
