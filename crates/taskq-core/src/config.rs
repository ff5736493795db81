//! Configuration resolution for taskq.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/taskq/settings.json`)
//! 3. Project config (`.taskq/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete taskq configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum number of tasks running at once. 0 means auto-detect.
    pub jobs: u32,
    /// Keep starting tasks after one fails.
    pub keep_going: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// On-disk settings file. Every field is optional so a file only overrides
/// what it names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    #[serde(default)]
    runner: RunnerOverlay,
    #[serde(default)]
    logging: LoggingOverlay,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunnerOverlay {
    jobs: Option<u32>,
    keep_going: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingOverlay {
    level: Option<String>,
    json: Option<bool>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = project_config_path(dir);
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("taskq").join("settings.json"))
}

/// Get the project config file path under `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(".taskq").join("settings.json")
}

fn load_config_file(path: &Path) -> Result<ConfigOverlay> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: ConfigOverlay) {
    if let Some(jobs) = overlay.runner.jobs {
        base.runner.jobs = jobs;
    }
    if let Some(keep_going) = overlay.runner.keep_going {
        base.runner.keep_going = keep_going;
    }
    if let Some(level) = overlay.logging.level {
        base.logging.level = level;
    }
    if let Some(json) = overlay.logging.json {
        base.logging.json = json;
    }
}

/// Apply `TASKQ_*` overrides. `lookup` resolves a variable name to its value.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("TASKQ_JOBS") {
        match val.parse() {
            Ok(n) => config.runner.jobs = n,
            Err(_) => tracing::warn!(value = %val, "Ignoring non-numeric TASKQ_JOBS"),
        }
    }
    if let Some(val) = lookup("TASKQ_KEEP_GOING")
        && let Some(b) = parse_bool(&val)
    {
        config.runner.keep_going = b;
    }
    if let Some(val) = lookup("TASKQ_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("TASKQ_LOG_JSON")
        && let Some(b) = parse_bool(&val)
    {
        config.logging.json = b;
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
