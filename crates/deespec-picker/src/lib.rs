//! Task loader and picker: enumerates SBIs from the spec tree, detects
//! incomplete instructions, and selects the next ready task.
//!
//! Uses a `BTreeMap<id, Task>` plus explicit DFS with a recursion stack
//! for cycle detection over SBI `depends_on` edges, the same shape a
//! package manager uses for its dependency graph.

pub mod detect;
pub mod loader;

pub use detect::{Detection, detect_incomplete_instructions, has_cycle};
pub use loader::load_tasks;

use std::collections::BTreeMap;
use std::path::Path;

use deespec_types::{FeedbackDraft, Task};

/// The outcome of one Picker pass: the selected task (if any) plus every
/// feedback draft produced while screening candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PickResult {
    pub selected: Option<Task>,
    pub drafts: Vec<FeedbackDraft>,
}

/// Select the next ready task out of `tasks`, given the set of task ids
/// already completed (derived from the journal by the caller). Does not
/// check prompt file sizes on disk; see [`pick_in`] for that.
///
/// 1. Screens every candidate for incomplete instructions, collecting
///    feedback drafts along the way.
/// 2. Drops candidates flagged `DEP_UNRESOLVED` or `DEP_CYCLE` from
///    eligibility.
/// 3. Picks the lowest-priority (numerically), lexicographically-tie-broken
///    task whose dependencies are all in `completed`.
pub fn pick(tasks: &[Task], completed: &std::collections::BTreeSet<String>) -> PickResult {
    pick_in(tasks, completed, None)
}

/// As [`pick`], additionally checking each candidate's prompt file size
/// against the 100 KiB cap when `base_dir` is given.
pub fn pick_in(
    tasks: &[Task],
    completed: &std::collections::BTreeSet<String>,
    base_dir: Option<&Path>,
) -> PickResult {
    let by_id: BTreeMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut drafts = Vec::new();
    let mut ineligible = std::collections::BTreeSet::new();

    for task in tasks {
        let detections = detect_incomplete_instructions(task, &by_id, completed, base_dir);
        for d in detections {
            if d.reason_code.blocks_selection() {
                ineligible.insert(task.id.clone());
            }
            drafts.push(d.into_draft());
        }
    }

    let selected = tasks
        .iter()
        .filter(|t| !ineligible.contains(&t.id))
        .filter(|t| t.meta.depends_on.iter().all(|dep| completed.contains(dep)))
        .min_by(|a, b| {
            a.meta
                .priority
                .cmp(&b.meta.priority)
                .then_with(|| a.id.cmp(&b.id))
        })
        .cloned();

    PickResult { selected, drafts }
}

/// The set of task ids the journal records as having reached `done`,
/// derived purely from the journal's `task_id`/`step` fields.
pub fn completed_task_ids(journal: &[deespec_types::JournalRecord]) -> std::collections::BTreeSet<String> {
    journal
        .iter()
        .filter(|r| r.step == deespec_types::Step::Done)
        .filter_map(|r| r.task_id.clone())
        .collect()
}
