use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where plugin files live inside a plugin directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LayoutSettings {
    /// A directory without this file is not a plugin
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Presence of this directory means dependencies are installed
    #[serde(default = "default_dependency_dir")]
    pub dependency_dir: String,

    /// Compiled entry point, relative to the plugin directory
    #[serde(default = "default_entry_point")]
    pub entry_point: PathBuf,

    /// Source file extensions whose changes trigger a reload
    #[serde(default = "default_watch_extensions")]
    pub watch_extensions: Vec<String>,
}

fn default_manifest_file() -> String {
    "package.json".to_string()
}

fn default_dependency_dir() -> String {
    "node_modules".to_string()
}

fn default_entry_point() -> PathBuf {
    PathBuf::from("out").join("plugin.js")
}

fn default_watch_extensions() -> Vec<String> {
    vec!["ts".to_string()]
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            manifest_file: default_manifest_file(),
            dependency_dir: default_dependency_dir(),
            entry_point: default_entry_point(),
            watch_extensions: default_watch_extensions(),
        }
    }
}

impl LayoutSettings {
    pub fn manifest_path(&self, plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(&self.manifest_file)
    }

    pub fn dependency_path(&self, plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(&self.dependency_dir)
    }

    pub fn entry_path(&self, plugin_dir: &Path) -> PathBuf {
        plugin_dir.join(&self.entry_point)
    }
}

/// Core application settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Plugin directories, relative to each workspace root, in load order
    #[serde(default)]
    pub base_directories: Vec<String>,

    /// Compiler binary
    #[serde(default = "default_tsc_path")]
    pub tsc_path: String,

    /// Package manager binary
    #[serde(default = "default_npm_path")]
    pub npm_path: String,

    #[serde(default = "default_compile_args")]
    pub compile_args: Vec<String>,

    #[serde(default = "default_install_args")]
    pub install_args: Vec<String>,

    /// Quiescence window between the first source change and the reload
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,

    #[serde(default)]
    pub layout: LayoutSettings,
}

fn default_tsc_path() -> String {
    Tool::Compiler.default_binary().to_string()
}

fn default_npm_path() -> String {
    Tool::PackageManager.default_binary().to_string()
}

fn default_compile_args() -> Vec<String> {
    vec!["-p".to_string(), ".".to_string()]
}

fn default_install_args() -> Vec<String> {
    vec!["install".to_string(), "--production=false".to_string()]
}

fn default_reload_delay_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_directories: Vec::new(),
            tsc_path: default_tsc_path(),
            npm_path: default_npm_path(),
            compile_args: default_compile_args(),
            install_args: default_install_args(),
            reload_delay_ms: default_reload_delay_ms(),
            layout: LayoutSettings::default(),
        }
    }
}

impl Settings {
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    /// The configured binary for `tool`.
    pub fn tool_path(&self, tool: Tool) -> &str {
        match tool {
            Tool::Compiler => &self.tsc_path,
            Tool::PackageManager => &self.npm_path,
        }
    }

    pub fn set_tool_path(&mut self, tool: Tool, path: String) {
        match tool {
            Tool::Compiler => self.tsc_path = path,
            Tool::PackageManager => self.npm_path = path,
        }
    }
}

/// External tools dynaplug depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Compiler,
    PackageManager,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Compiler, Tool::PackageManager];

    /// Executable name looked up on the search path.
    pub fn default_binary(self) -> &'static str {
        match self {
            Tool::Compiler => "tsc",
            Tool::PackageManager => "npm",
        }
    }

    /// Arguments of a cheap invocation that succeeds when the tool works.
    pub fn probe_args(self) -> &'static [&'static str] {
        match self {
            Tool::Compiler => &["-h"],
            Tool::PackageManager => &["help"],
        }
    }

    /// Settings key holding the tool's path.
    pub fn setting_key(self) -> &'static str {
        match self {
            Tool::Compiler => "tsc_path",
            Tool::PackageManager => "npm_path",
        }
    }
}
