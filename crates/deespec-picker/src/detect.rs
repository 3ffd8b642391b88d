//! Incomplete-instruction detection: the checks a candidate task is
//! screened against before the Picker will consider it ready.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;
use deespec_types::{FeedbackDraft, ReasonCode, Task};

/// Prompt files larger than this are flagged `PROMPT_ERROR`.
pub const MAX_PROMPT_BYTES: u64 = 100 * 1024;

/// One incomplete-instruction finding against a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub target_task_id: String,
    pub reason_code: ReasonCode,
    pub summary: String,
}

impl Detection {
    /// Render this detection as a persistable `FeedbackDraft`.
    pub fn into_draft(self) -> FeedbackDraft {
        let suggested_fb_id = format!(
            "FB-{}-{}",
            self.target_task_id,
            self.reason_code.as_str().to_lowercase()
        );
        FeedbackDraft {
            title: format!("{}: {}", self.reason_code.as_str(), self.target_task_id),
            target_task_id: self.target_task_id,
            reason_code: self.reason_code,
            summary: self.summary,
            evidence_paths: Vec::new(),
            suggested_fb_id,
            created_at: Utc::now(),
        }
    }
}

/// Screen `task` for every incomplete-instruction condition.
/// `base_dir`, when given, resolves `task.prompt_path` on disk so
/// the prompt-size check can run; without it, `PROMPT_ERROR` is skipped
/// (useful for pure unit tests that never touch a filesystem).
pub fn detect_incomplete_instructions(
    task: &Task,
    by_id: &BTreeMap<&str, &Task>,
    completed: &BTreeSet<String>,
    base_dir: Option<&Path>,
) -> Vec<Detection> {
    let mut out = Vec::new();

    if task.id.is_empty() || task.title.is_empty() {
        out.push(Detection {
            target_task_id: task.id.clone(),
            reason_code: ReasonCode::MetaMissing,
            summary: "task is missing a required id or title".to_string(),
        });
    }

    if let Some(reason) = invalid_path_reason(&task.prompt_path) {
        out.push(Detection {
            target_task_id: task.id.clone(),
            reason_code: ReasonCode::PathInvalid,
            summary: format!("prompt path {} {reason}", task.prompt_path.display()),
        });
    }

    let task_in_cycle = has_cycle(&task.id, by_id);

    for dep in &task.meta.depends_on {
        if completed.contains(dep) {
            continue;
        }
        // A dep that is itself part of the same cycle is reported once,
        // below, as DEP_CYCLE — not also as DEP_UNRESOLVED.
        if task_in_cycle && has_cycle(dep, by_id) {
            continue;
        }
        out.push(Detection {
            target_task_id: task.id.clone(),
            reason_code: ReasonCode::DepUnresolved,
            summary: format!("dependency {dep} is not yet completed"),
        });
    }

    if task_in_cycle {
        out.push(Detection {
            target_task_id: task.id.clone(),
            reason_code: ReasonCode::DepCycle,
            summary: format!("dependency graph rooted at {} contains a cycle", task.id),
        });
    }

    if let Some(dir) = base_dir
        && invalid_path_reason(&task.prompt_path).is_none()
        && let Ok(metadata) = std::fs::metadata(dir.join(&task.prompt_path))
        && metadata.len() > MAX_PROMPT_BYTES
    {
        out.push(Detection {
            target_task_id: task.id.clone(),
            reason_code: ReasonCode::PromptError,
            summary: format!(
                "prompt file {} is {} bytes, exceeding the {MAX_PROMPT_BYTES}-byte limit",
                task.prompt_path.display(),
                metadata.len()
            ),
        });
    }

    out
}

/// `DEP_CYCLE`: DFS over the `depends_on` graph rooted at `root`, using an
/// explicit recursion stack (`visiting`) to detect a back-edge. Uses a
/// `map<id -> task>` plus explicit DFS, not in-object references.
pub fn has_cycle(root: &str, by_id: &BTreeMap<&str, &Task>) -> bool {
    let mut visiting = BTreeSet::new();
    let mut visited = BTreeSet::new();
    visit(root, by_id, &mut visiting, &mut visited)
}

fn visit(
    id: &str,
    by_id: &BTreeMap<&str, &Task>,
    visiting: &mut BTreeSet<String>,
    visited: &mut BTreeSet<String>,
) -> bool {
    if visiting.contains(id) {
        return true;
    }
    if visited.contains(id) {
        return false;
    }
    visiting.insert(id.to_string());
    if let Some(task) = by_id.get(id) {
        for dep in &task.meta.depends_on {
            if visit(dep, by_id, visiting, visited) {
                return true;
            }
        }
    }
    visiting.remove(id);
    visited.insert(id.to_string());
    false
}

/// `PATH_INVALID`: absolute, contains a `..` component, contains a
/// backslash, or carries a drive-letter prefix (`C:`).
fn invalid_path_reason(path: &Path) -> Option<&'static str> {
    let s = path.to_string_lossy();
    if path.is_absolute() {
        return Some("is absolute");
    }
    if s.split(['/', '\\']).any(|part| part == "..") {
        return Some("contains a parent-directory reference");
    }
    if s.contains('\\') {
        return Some("contains a backslash");
    }
    if has_drive_letter_prefix(&s) {
        return Some("contains a drive-letter prefix");
    }
    None
}

fn has_drive_letter_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_types::TaskMeta;

    fn task(id: &str, prompt: &str, depends_on: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            prompt_path: prompt.into(),
            meta: TaskMeta {
                depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
                priority: 0,
                labels: vec![],
            },
        }
    }

    #[test]
    fn flags_missing_id_or_title() {
        let mut t = task("a", "a/prompt.md", &[]);
        t.title = String::new();
        let by_id = BTreeMap::new();
        let found = detect_incomplete_instructions(&t, &by_id, &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::MetaMissing));
    }

    #[test]
    fn flags_absolute_prompt_path() {
        let t = task("a", "/etc/passwd", &[]);
        let by_id = BTreeMap::new();
        let found = detect_incomplete_instructions(&t, &by_id, &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::PathInvalid));
    }

    #[test]
    fn flags_parent_dir_reference() {
        let t = task("a", "../outside.md", &[]);
        let by_id = BTreeMap::new();
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::PathInvalid));
    }

    #[test]
    fn flags_backslash_path() {
        let t = task("a", r"sub\prompt.md", &[]);
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::PathInvalid));
    }

    #[test]
    fn flags_drive_letter_path() {
        let t = task("a", r"C:\prompt.md", &[]);
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::PathInvalid));
    }

    #[test]
    fn accepts_a_clean_relative_path() {
        let t = task("a", "a/prompt.md", &[]);
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), None);
        assert!(!found.iter().any(|d| d.reason_code == ReasonCode::PathInvalid));
    }

    #[test]
    fn flags_unresolved_dependency() {
        let t = task("a", "a/prompt.md", &["b"]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &t);
        let found = detect_incomplete_instructions(&t, &by_id, &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::DepUnresolved));
    }

    #[test]
    fn does_not_flag_a_completed_dependency() {
        let t = task("a", "a/prompt.md", &["b"]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &t);
        let mut completed = BTreeSet::new();
        completed.insert("b".to_string());
        let found = detect_incomplete_instructions(&t, &by_id, &completed, None);
        assert!(!found.iter().any(|d| d.reason_code == ReasonCode::DepUnresolved));
    }

    #[test]
    fn has_cycle_detects_a_two_node_cycle() {
        let a = task("a", "a/prompt.md", &["b"]);
        let b = task("b", "b/prompt.md", &["a"]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &a);
        by_id.insert("b", &b);
        assert!(has_cycle("a", &by_id));
    }

    #[test]
    fn has_cycle_is_false_for_a_dag() {
        let a = task("a", "a/prompt.md", &["b"]);
        let b = task("b", "b/prompt.md", &[]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &a);
        by_id.insert("b", &b);
        assert!(!has_cycle("a", &by_id));
    }

    #[test]
    fn a_cycle_member_yields_only_dep_cycle_not_also_dep_unresolved() {
        let a = task("a", "a/prompt.md", &["b"]);
        let b = task("b", "b/prompt.md", &["a"]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &a);
        by_id.insert("b", &b);

        let found = detect_incomplete_instructions(&a, &by_id, &BTreeSet::new(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reason_code, ReasonCode::DepCycle);
    }

    #[test]
    fn an_unresolved_dep_outside_the_cycle_is_still_flagged() {
        let a = task("a", "a/prompt.md", &["b", "c"]);
        let b = task("b", "b/prompt.md", &["a"]);
        let c = task("c", "c/prompt.md", &[]);
        let mut by_id = BTreeMap::new();
        by_id.insert("a", &a);
        by_id.insert("b", &b);
        by_id.insert("c", &c);

        let found = detect_incomplete_instructions(&a, &by_id, &BTreeSet::new(), None);
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::DepCycle));

        let unresolved: Vec<_> = found
            .iter()
            .filter(|d| d.reason_code == ReasonCode::DepUnresolved)
            .collect();
        assert_eq!(unresolved.len(), 1);
        assert!(unresolved[0].summary.contains("dependency c "));
    }

    #[test]
    fn prompt_error_fires_when_the_file_exceeds_the_limit() {
        let td = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(td.path().join("a")).expect("mkdir");
        std::fs::write(td.path().join("a/prompt.md"), "x".repeat(MAX_PROMPT_BYTES as usize + 1))
            .expect("write");
        let t = task("a", "a/prompt.md", &[]);
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), Some(td.path()));
        assert!(found.iter().any(|d| d.reason_code == ReasonCode::PromptError));
    }

    #[test]
    fn prompt_error_does_not_fire_at_exactly_the_limit() {
        let td = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(td.path().join("a")).expect("mkdir");
        std::fs::write(td.path().join("a/prompt.md"), "x".repeat(MAX_PROMPT_BYTES as usize)).expect("write");
        let t = task("a", "a/prompt.md", &[]);
        let found = detect_incomplete_instructions(&t, &BTreeMap::new(), &BTreeSet::new(), Some(td.path()));
        assert!(!found.iter().any(|d| d.reason_code == ReasonCode::PromptError));
    }
}
