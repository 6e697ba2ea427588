//! Locating the external tools on the search path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::host::ui::{HostUi, Severity};
use crate::process::{CommandSpec, ProcessRunner};
use crate::settings::{SettingsManager, Tool};

/// Finds executables on a search path (`PATH` by default).
#[derive(Debug, Clone, Default)]
pub struct BinaryResolver {
    search_path: Option<OsString>,
}

impl BinaryResolver {
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    /// Every executable file named `name` on the search path, in search
    /// order.
    pub fn find_candidates(&self, name: &str) -> Vec<PathBuf> {
        let Some(search_path) = &self.search_path else {
            return Vec::new();
        };
        std::env::split_paths(search_path)
            .map(|dir| dir.join(name))
            .filter(|candidate| is_executable(candidate))
            .collect()
    }

    /// Picks the binary for `name`: the only candidate, or the user's choice
    /// among several. `None` when nothing was found or the pick was
    /// dismissed.
    pub async fn select_binary(&self, ui: &dyn HostUi, name: &str) -> Option<PathBuf> {
        let mut candidates = self.find_candidates(name);
        debug!(name, candidates = candidates.len(), "Searched for executable");
        match candidates.len() {
            0 => {
                ui.show_error(&format!("Could not find the '{name}' executable"));
                None
            }
            1 => candidates.pop(),
            _ => {
                let items: Vec<String> = candidates
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect();
                ui.quick_pick(&items).await.map(PathBuf::from)
            }
        }
    }

    /// Probes the configured binary for `tool`. When the probe fails the user
    /// may locate the tool on the search path; the choice is persisted and
    /// probed again. Returns `false` when the user gives up.
    pub async fn ensure_command_works(
        &self,
        tool: Tool,
        runner: &dyn ProcessRunner,
        ui: &dyn HostUi,
        settings: &SettingsManager,
    ) -> Result<bool> {
        let name = tool.default_binary();
        let find = format!("find {name} in system");
        let choices = ["abort".to_string(), find.clone()];

        loop {
            let binary = settings.settings().tool_path(tool).to_string();
            let probe = CommandSpec::new(&binary).args(tool.probe_args().iter().copied());
            match runner.run(&probe).await {
                Ok(_) => return Ok(true),
                Err(failure) => warn!(tool = name, "Tool probe failed: {failure}"),
            }

            let answer = ui
                .prompt(
                    Severity::Error,
                    &format!("Command {name} is not available."),
                    &choices,
                )
                .await;
            if answer.as_deref() != Some(find.as_str()) {
                return Ok(false);
            }

            let Some(path) = self.select_binary(ui, name).await else {
                return Ok(false);
            };
            info!(tool = name, path = %path.display(), "Using user-selected binary");
            settings.set_tool_path(tool, path.display().to_string())?;
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::host::mock::RecordingUi;
    use crate::process::mock::{MockOutcome, MockProcessRunner};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn install(dir: &Path, name: &str, mode: u32) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn search_path<P: AsRef<Path>>(dirs: &[P]) -> OsString {
        std::env::join_paths(dirs.iter().map(|dir| dir.as_ref())).unwrap()
    }

    #[test]
    fn test_find_candidates_requires_executable_bit() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let c = temp.path().join("c");
        let expected = install(&a, "tsc", 0o755);
        install(&b, "tsc", 0o644);
        std::fs::create_dir_all(c.join("tsc")).unwrap();

        let resolver = BinaryResolver::with_search_path(search_path(&[&a, &b, &c]));

        assert_eq!(resolver.find_candidates("tsc"), vec![expected]);
        assert!(resolver.find_candidates("npm").is_empty());
    }

    #[tokio::test]
    async fn test_select_binary_without_candidates_reports_error() {
        let temp = TempDir::new().unwrap();
        let resolver = BinaryResolver::with_search_path(temp.path().as_os_str());
        let ui = RecordingUi::new();

        assert_eq!(resolver.select_binary(&ui, "tsc").await, None);
        assert_eq!(ui.errors(), vec!["Could not find the 'tsc' executable"]);
    }

    #[tokio::test]
    async fn test_select_binary_with_one_candidate_skips_pick() {
        let temp = TempDir::new().unwrap();
        let only = install(temp.path(), "npm", 0o755);
        let resolver = BinaryResolver::with_search_path(temp.path().as_os_str());
        let ui = RecordingUi::new();

        assert_eq!(resolver.select_binary(&ui, "npm").await, Some(only));
        assert!(ui.picks().is_empty());
    }

    #[tokio::test]
    async fn test_select_binary_with_several_candidates_asks_user() {
        let temp = TempDir::new().unwrap();
        let first = install(&temp.path().join("one"), "tsc", 0o755);
        let second = install(&temp.path().join("two"), "tsc", 0o755);
        let resolver = BinaryResolver::with_search_path(search_path(&[
            &temp.path().join("one"),
            &temp.path().join("two"),
        ]));
        let ui = RecordingUi::new();
        ui.answer(second.to_str());

        assert_eq!(resolver.select_binary(&ui, "tsc").await, Some(second.clone()));
        assert_eq!(
            ui.picks(),
            vec![vec![
                first.display().to_string(),
                second.display().to_string()
            ]]
        );
    }

    #[tokio::test]
    async fn test_working_tool_needs_no_prompt() {
        let temp = TempDir::new().unwrap();
        let settings = SettingsManager::from_path(temp.path().join("settings.toml")).unwrap();
        let runner = MockProcessRunner::new();
        let ui = RecordingUi::new();

        let works = BinaryResolver::with_search_path("")
            .ensure_command_works(Tool::Compiler, &runner, &ui, &settings)
            .await
            .unwrap();

        assert!(works);
        assert_eq!(runner.call_count("tsc -h"), 1);
        assert!(ui.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_broken_tool_is_relocated_and_persisted() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        let npm = install(&bin, "npm", 0o755);
        let settings = SettingsManager::from_path(temp.path().join("settings.toml")).unwrap();
        let runner = MockProcessRunner::new();
        runner.respond("npm help", MockOutcome::failure("npm: not found"));
        let ui = RecordingUi::new();
        ui.answer(Some("find npm in system"));

        let works = BinaryResolver::with_search_path(bin.as_os_str())
            .ensure_command_works(Tool::PackageManager, &runner, &ui, &settings)
            .await
            .unwrap();

        assert!(works);
        assert_eq!(ui.prompts(), vec!["Command npm is not available."]);
        assert_eq!(
            ui.prompt_choices(),
            vec![vec!["abort".to_string(), "find npm in system".to_string()]]
        );
        assert_eq!(settings.settings().npm_path, npm.display().to_string());
        assert_eq!(runner.call_count(&format!("{} help", npm.display())), 1);
        let saved = SettingsManager::from_path(temp.path().join("settings.toml")).unwrap();
        assert_eq!(saved.settings().npm_path, npm.display().to_string());
    }

    #[tokio::test]
    async fn test_abort_and_dismiss_give_up() {
        let temp = TempDir::new().unwrap();
        let settings = SettingsManager::from_path(temp.path().join("settings.toml")).unwrap();
        let runner = MockProcessRunner::new();
        runner.respond("tsc -h", MockOutcome::failure("tsc: not found"));
        let ui = RecordingUi::new();
        ui.answer(Some("abort"));
        let resolver = BinaryResolver::with_search_path("");

        assert!(!resolver
            .ensure_command_works(Tool::Compiler, &runner, &ui, &settings)
            .await
            .unwrap());
        assert!(!resolver
            .ensure_command_works(Tool::Compiler, &runner, &ui, &settings)
            .await
            .unwrap());
        assert_eq!(ui.prompts().len(), 2);
        assert_eq!(settings.settings().tsc_path, "tsc");
    }
}
