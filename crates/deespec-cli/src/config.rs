//! Loads `.deespec/config.toml`: the ambient, non-core configuration layer
//! that sits outside the supervisor's own durable state. A `serde`-derived
//! struct with a `Default` impl, TOML parse with `.context(...)`, and a
//! directory walk-up to find the file from anywhere inside the workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use deespec_retry::SupervisorConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";
pub const WORKFLOW_ENV_VAR: &str = "DEESPEC_WORKFLOW";
pub const POLICY_ENV_VAR: &str = "DEESPEC_POLICY";

/// `<workspace>/.deespec/config.toml`'s shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default = "default_agent_timeout", with = "humantime_serde")]
    pub agent_timeout: Duration,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Override for the workflow definition path, relative to the
    /// workspace root. `DEESPEC_WORKFLOW` takes precedence when set.
    #[serde(default)]
    pub workflow_path: Option<PathBuf>,
    #[serde(flatten)]
    pub supervisor: SupervisorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            agent_timeout: default_agent_timeout(),
            project_name: default_project_name(),
            language: default_language(),
            workflow_path: None,
            supervisor: SupervisorConfig::default(),
        }
    }
}

fn default_agent_id() -> String {
    "claude".to_string()
}

fn default_agent_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_project_name() -> String {
    "project".to_string()
}

fn default_language() -> String {
    "rust".to_string()
}

/// `<workspace>/.deespec/config.toml`.
pub fn config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".deespec").join(CONFIG_FILE)
}

/// Load `Config` from `<workspace_root>/.deespec/config.toml`, or defaults
/// if the file doesn't exist. Full policy precedence resolution is an
/// external collaborator's job; this merely
/// reads the one file the CLI needs to populate a `SupervisorConfig` and
/// `EngineContext`.
pub fn load_config(workspace_root: &Path) -> Result<Config> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Walk up from `start_dir` looking for `.deespec/config.toml`.
pub fn find_workspace_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;
    loop {
        if current.join(".deespec").is_dir() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// The workflow definition path to load: `DEESPEC_WORKFLOW` if set,
/// otherwise `config.workflow_path` resolved against `workspace_root`,
/// otherwise whatever `deespec_workflow::find_workflow_file` discovers by
/// walking up from `workspace_root`.
pub fn resolve_workflow_path(workspace_root: &Path, config: &Config) -> Result<PathBuf> {
    if let Ok(env_path) = std::env::var(WORKFLOW_ENV_VAR) {
        return Ok(PathBuf::from(env_path));
    }
    if let Some(configured) = &config.workflow_path {
        return Ok(workspace_root.join(configured));
    }
    deespec_workflow::find_workflow_file(workspace_root)
        .with_context(|| format!("no {} found under {}", deespec_workflow::WORKFLOW_FILE, workspace_root.display()))
}
