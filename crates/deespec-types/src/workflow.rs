//! Workflow definition: the configured, ordered stage list and per-stage
//! prompt/decision-regex settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::Step;

/// One stage's configuration within a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    pub id: Step,
    pub prompt_path: PathBuf,
    /// Only meaningful for the `review` stage; falls back to the engine
    /// default decoder pattern when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_regex: Option<String>,
}

/// The placeholders the prompt template substitution step recognizes.
pub const ALLOWED_PLACEHOLDERS: &[&str] = &["turn", "task_id", "project_name", "language"];

/// The whitelist of agent identifiers the Agent Client may invoke.
pub const ALLOWED_AGENTS: &[&str] = &["claude", "codex", "gemini"];

/// A complete, ordered workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub stages: Vec<StageDef>,
    /// Maximum prompt size, in kilobytes, after template substitution.
    #[serde(default = "default_max_prompt_kb")]
    pub max_prompt_kb: u64,
}

fn default_max_prompt_kb() -> u64 {
    100
}

impl WorkflowDef {
    pub fn stage(&self, id: Step) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.id == id)
    }
}
