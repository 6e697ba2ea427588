//! Scripted [`ProcessRunner`] for tests and dry runs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{CommandFailure, CommandSpec, ProcessRunner, ShellError, ShellOutput};

/// What a scripted command does when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Success { stdout: String },
    Failure { stderr: String, status: i32 },
}

impl MockOutcome {
    pub fn success() -> Self {
        MockOutcome::Success {
            stdout: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        MockOutcome::Failure {
            stderr: stderr.into(),
            status: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    command_line: String,
    cwd: Option<PathBuf>,
    outcome: MockOutcome,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        self.command_line == spec.command_line()
            && self
                .cwd
                .as_ref()
                .map_or(true, |cwd| spec.cwd.as_deref() == Some(cwd.as_path()))
    }
}

#[derive(Debug, Default)]
struct MockState {
    once: Vec<Rule>,
    persistent: Vec<Rule>,
    calls: Vec<CommandSpec>,
}

/// Answers commands from a script instead of spawning processes.
///
/// One-shot rules are consumed first, in the order they were added. Then the
/// most recently added persistent rule wins. Unmatched commands succeed with
/// empty output. Clones share the same script and call log.
#[derive(Debug, Clone, Default)]
pub struct MockProcessRunner {
    state: Arc<Mutex<MockState>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run of `command_line` produces `outcome`.
    pub fn respond(&self, command_line: impl Into<String>, outcome: MockOutcome) {
        self.push(false, command_line.into(), None, outcome);
    }

    /// Runs of `command_line` inside `cwd` produce `outcome`.
    pub fn respond_in(
        &self,
        cwd: impl AsRef<Path>,
        command_line: impl Into<String>,
        outcome: MockOutcome,
    ) {
        self.push(
            false,
            command_line.into(),
            Some(cwd.as_ref().to_path_buf()),
            outcome,
        );
    }

    /// The next matching run of `command_line` produces `outcome`.
    pub fn respond_once(&self, command_line: impl Into<String>, outcome: MockOutcome) {
        self.push(true, command_line.into(), None, outcome);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.lock().calls.clone()
    }

    /// Number of runs whose command line equals `command_line`.
    pub fn call_count(&self, command_line: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|spec| spec.command_line() == command_line)
            .count()
    }

    fn push(&self, once: bool, command_line: String, cwd: Option<PathBuf>, outcome: MockOutcome) {
        let rule = Rule {
            command_line,
            cwd,
            outcome,
        };
        let mut state = self.lock();
        if once {
            state.once.push(rule);
        } else {
            state.persistent.push(rule);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outcome_for(&self, spec: &CommandSpec) -> MockOutcome {
        let mut state = self.lock();
        state.calls.push(spec.clone());

        if let Some(index) = state.once.iter().position(|rule| rule.matches(spec)) {
            return state.once.remove(index).outcome;
        }
        state
            .persistent
            .iter()
            .rev()
            .find(|rule| rule.matches(spec))
            .map_or_else(MockOutcome::success, |rule| rule.outcome.clone())
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ShellOutput, CommandFailure> {
        let mut output = ShellOutput::new(spec.command_line());
        match self.outcome_for(spec) {
            MockOutcome::Success { stdout } => {
                output.stdout = stdout;
                Ok(output)
            }
            MockOutcome::Failure { stderr, status } => {
                output.stderr = stderr;
                output.error = Some(ShellError::Exit {
                    status: format!("exit status: {status}"),
                });
                Err(CommandFailure::new(output))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_commands_succeed() {
        let runner = MockProcessRunner::new();
        let output = runner.run(&CommandSpec::new("tsc").arg("-h")).await.unwrap();

        assert_eq!(output.command, "tsc -h");
        assert_eq!(runner.call_count("tsc -h"), 1);
    }

    #[tokio::test]
    async fn test_one_shot_rules_are_consumed_before_persistent_ones() {
        let runner = MockProcessRunner::new();
        runner.respond("tsc -p .", MockOutcome::success());
        runner.respond_once("tsc -p .", MockOutcome::failure("error TS1005"));
        let spec = CommandSpec::new("tsc").args(["-p", "."]);

        let first = runner.run(&spec).await.unwrap_err();
        assert_eq!(first.output.stderr, "error TS1005");
        assert!(runner.run(&spec).await.is_ok());
    }

    #[tokio::test]
    async fn test_directory_scoped_rules_only_match_their_directory() {
        let runner = MockProcessRunner::new();
        runner.respond_in("/ws/a", "tsc -p .", MockOutcome::failure("broken"));

        let in_a = CommandSpec::new("tsc").args(["-p", "."]).current_dir("/ws/a");
        let in_b = CommandSpec::new("tsc").args(["-p", "."]).current_dir("/ws/b");

        assert!(runner.run(&in_a).await.is_err());
        assert!(runner.run(&in_b).await.is_ok());
    }
}
