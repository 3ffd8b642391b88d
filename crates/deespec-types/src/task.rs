//! SBI task definitions, as discovered by the task loader.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata carried alongside a task: dependency edges, priority, labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lower numbers are picked first.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A single Spec Backlog Item, as discovered under `specs/sbi/<id>/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub prompt_path: PathBuf,
    #[serde(default)]
    pub meta: TaskMeta,
}
