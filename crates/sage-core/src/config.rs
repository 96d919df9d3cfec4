//! Configuration resolution for Sage.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/sage/settings.json)
//! 3. Project config (<repo>/.sage/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Config files are merged key by key, so a project file that only sets
//! `watcher.refresh_secs` keeps every other value from the global file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Sage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub watcher: WatcherConfig,
    pub materialize: MaterializeConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            watcher: WatcherConfig::default(),
            materialize: MaterializeConfig::default(),
            log_level: "warn".to_string(),
        }
    }
}

/// Where virtual branch state lives inside the git metadata directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory name under `.git/` holding `branches.json` and the daemon PID file.
    pub dir_name: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir_name: "sage".to_string(),
        }
    }
}

/// Filesystem watcher settings used by `sage daemon`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Glob patterns matched against the final component of each path.
    pub ignore: Vec<String>,
    /// Additional patterns appended to `ignore` (handy for project files).
    pub extra_ignore: Vec<String>,
    /// Capacity of the bounded event channel feeding the worker.
    pub channel_capacity: usize,
    /// How often the daemon re-reads which branch is active (seconds).
    pub refresh_secs: u64,
}

/// Built-in ignore list: VCS metadata, dependency caches, editor swap files, logs.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".sage",
    "node_modules",
    "vendor",
    "target",
    "__pycache__",
    ".cache",
    ".idea",
    ".vscode",
    "*.swp",
    "*.swo",
    "*.swx",
    "*~",
    ".#*",
    "#*#",
    "4913",
    "*.tmp",
    "*.log",
    ".DS_Store",
];

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            ignore: DEFAULT_IGNORE.iter().map(ToString::to_string).collect(),
            extra_ignore: Vec::new(),
            channel_capacity: 256,
            refresh_secs: 2,
        }
    }
}

impl WatcherConfig {
    /// The effective ignore list (`ignore` followed by `extra_ignore`).
    pub fn ignore_patterns(&self) -> Vec<String> {
        self.ignore
            .iter()
            .chain(self.extra_ignore.iter())
            .cloned()
            .collect()
    }
}

/// Options for turning a virtual branch into a real commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeConfig {
    /// Pass `--signoff` to `git commit`.
    pub signoff: bool,
    /// Allow the materialized commit to be empty.
    pub allow_empty: bool,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_values(&mut merged, load_config_file(&global_path)?);
        }
    }

    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            merge_values(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join("Library/Application Support/sage/settings.json"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|p| p.join("sage").join("settings.json"))
    }
}

/// Project config file path for a repository root.
pub fn project_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".sage").join("settings.json")
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must contain a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively merge `overlay` into `base`. Objects merge per key; every
/// other value in `overlay` replaces the one in `base`.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("SAGE_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = var("SAGE_WATCH_IGNORE") {
        config.watcher.extra_ignore.extend(
            val.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
        );
    }
    if let Some(val) = var("SAGE_SIGNOFF") {
        if let Ok(b) = val.parse() {
            config.materialize.signoff = b;
        }
    }
    if let Some(val) = var("SAGE_REFRESH_SECS") {
        if let Ok(n) = val.parse() {
            config.watcher.refresh_secs = n;
        }
    }
}
