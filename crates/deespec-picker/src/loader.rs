//! Walks `<workspace>/specs/sbi/<id>/` and parses each task's metadata.
//!
//! Uses a plain `fs::read_to_string` + `toml::from_str` with
//! `.context(...)` at each I/O boundary, since SBIs are plain
//! directories, not crates with their own build metadata.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use deespec_types::{Task, TaskMeta};

pub const SBI_ROOT: &str = "specs/sbi";
pub const META_FILE: &str = "meta.toml";
pub const PROMPT_FILE: &str = "prompt.md";

/// The subset of `meta.toml` we parse directly into `TaskMeta`, plus the
/// title field that lives alongside it.
#[derive(Debug, Clone, serde::Deserialize, Default)]
struct TaskMetaFile {
    #[serde(default)]
    title: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    labels: Vec<String>,
}

/// Enumerate every SBI task directory under `<workspace>/specs/sbi/`.
///
/// Each task directory is expected to contain `meta.toml` (title,
/// `depends_on`, priority, labels) and a prompt file, conventionally
/// `prompt.md`. A directory missing `meta.toml` yields a `Task` with
/// empty `id`/`title` so the Picker's `META_MISSING` detection can flag
/// it rather than the loader silently skipping it.
pub fn load_tasks(workspace: &Path) -> Result<Vec<Task>> {
    let root = workspace.join(SBI_ROOT);
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut tasks = Vec::new();
    let entries = fs::read_dir(&root)
        .with_context(|| format!("failed to read SBI root {}", root.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry under {}", root.display()))?;
        if !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            continue;
        }
        let id = entry.file_name().to_string_lossy().to_string();
        tasks.push(load_task(&entry.path(), &id)?);
    }

    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(tasks)
}

fn load_task(dir: &Path, id: &str) -> Result<Task> {
    let meta_path = dir.join(META_FILE);
    let meta_file: TaskMetaFile = if meta_path.exists() {
        let content = fs::read_to_string(&meta_path)
            .with_context(|| format!("failed to read {}", meta_path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", meta_path.display()))?
    } else {
        TaskMetaFile::default()
    };

    let prompt_path: PathBuf = Path::new(SBI_ROOT).join(id).join(PROMPT_FILE);

    Ok(Task {
        id: id.to_string(),
        title: meta_file.title,
        prompt_path,
        meta: TaskMeta {
            depends_on: meta_file.depends_on,
            priority: meta_file.priority,
            labels: meta_file.labels,
        },
    })
}
