//! External process execution.
//!
//! Every external tool dynaplug touches (the compiler, the dependency
//! installer, tool probes) goes through a [`ProcessRunner`]. A run either
//! resolves with the captured [`ShellOutput`] or fails with a
//! [`CommandFailure`] carrying the same structure plus the cause.

pub mod mock;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::host::ui::{HostUi, ProgressGuard};

/// Upper bound on the bytes captured from each of stdout and stderr.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Why an external command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ShellError {
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("command exited with {status}")]
    Exit { status: String },

    #[error("{stream} exceeded the {limit} byte output limit")]
    OutputLimit { stream: String, limit: usize },

    #[error("I/O error while running command: {message}")]
    Io { message: String },
}

/// Outcome of one external process execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// The literal command line, `"<program> <args joined by spaces>"`.
    pub command: String,
    pub error: Option<ShellError>,
}

impl ShellOutput {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }
}

/// A command that did not succeed, with everything it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub output: ShellOutput,
}

impl CommandFailure {
    pub fn new(output: ShellOutput) -> Self {
        Self { output }
    }

    fn with_cause(mut output: ShellOutput, cause: ShellError) -> Self {
        output.error = Some(cause);
        Self { output }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.output.error {
            Some(cause) => write!(f, "`{}` failed: {cause}", self.output.command),
            None => write!(f, "`{}` failed", self.output.command),
        }
    }
}

impl std::error::Error for CommandFailure {}

/// Program, arguments, environment and working directory of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// When non-empty, replaces the inherited environment entirely.
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Runs external commands.
///
/// The production implementation is [`SystemProcessRunner`]; tests use
/// [`mock::MockProcessRunner`] to script outcomes without spawning anything.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `spec` to completion.
    ///
    /// Resolves with the captured output on a zero exit status. Non-zero
    /// exit, spawn errors and oversized output all produce a
    /// [`CommandFailure`].
    async fn run(&self, spec: &CommandSpec) -> Result<ShellOutput, CommandFailure>;
}

/// Spawns real child processes, reporting a non-cancellable progress
/// notification to the host for the duration of each run.
pub struct SystemProcessRunner {
    ui: Arc<dyn HostUi>,
}

impl SystemProcessRunner {
    pub fn new(ui: Arc<dyn HostUi>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ShellOutput, CommandFailure> {
        let command_line = spec.command_line();
        let _progress =
            ProgressGuard::start(self.ui.clone(), &format!("Running command {command_line}"));

        debug!(command = %command_line, cwd = ?spec.cwd, "Running external command");
        let result = execute(spec, command_line).await;

        let output = match &result {
            Ok(output) => output,
            Err(failure) => &failure.output,
        };
        if !output.stdout.is_empty() {
            debug!(command = %output.command, stdout = %output.stdout, "Command stdout");
        }
        if !output.stderr.is_empty() {
            warn!(command = %output.command, stderr = %output.stderr, "Command stderr");
        }
        result
    }
}

async fn execute(spec: &CommandSpec, command_line: String) -> Result<ShellOutput, CommandFailure> {
    let mut output = ShellOutput::new(command_line);

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !spec.env.is_empty() {
        command.env_clear();
        command.envs(spec.env.iter().map(|(key, value)| (key, value)));
    }
    if let Some(dir) = &spec.cwd {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let cause = ShellError::Spawn {
                program: spec.program.clone(),
                message: e.to_string(),
            };
            return Err(CommandFailure::with_cause(output, cause));
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let cause = ShellError::Io {
            message: "child output pipes were not captured".to_string(),
        };
        return Err(CommandFailure::with_cause(output, cause));
    };

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let captured = tokio::try_join!(
        capture(stdout, "stdout", &mut stdout_buf),
        capture(stderr, "stderr", &mut stderr_buf),
    );
    output.stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
    output.stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

    if let Err(cause) = captured {
        let _ = child.kill().await;
        return Err(CommandFailure::with_cause(output, cause));
    }

    match child.wait().await {
        Ok(status) if status.success() => Ok(output),
        Ok(status) => {
            let cause = ShellError::Exit {
                status: status.to_string(),
            };
            Err(CommandFailure::with_cause(output, cause))
        }
        Err(e) => {
            let cause = ShellError::Io {
                message: e.to_string(),
            };
            Err(CommandFailure::with_cause(output, cause))
        }
    }
}

/// Reads `reader` to EOF into `buf`, failing once more than
/// [`MAX_OUTPUT_BYTES`] arrive. `buf` keeps at most the limit.
async fn capture<R>(reader: R, stream: &str, buf: &mut Vec<u8>) -> Result<(), ShellError>
where
    R: AsyncRead + Unpin,
{
    reader
        .take(MAX_OUTPUT_BYTES as u64 + 1)
        .read_to_end(buf)
        .await
        .map_err(|e| ShellError::Io {
            message: e.to_string(),
        })?;

    if buf.len() > MAX_OUTPUT_BYTES {
        buf.truncate(MAX_OUTPUT_BYTES);
        return Err(ShellError::OutputLimit {
            stream: stream.to_string(),
            limit: MAX_OUTPUT_BYTES,
        });
    }
    Ok(())
}
