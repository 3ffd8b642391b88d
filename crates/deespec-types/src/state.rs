//! The durable state document: one per workspace, CAS-protected.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed stage sequence the Stage Engine drives a task through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Plan,
    Implement,
    Test,
    Review,
    Done,
}

impl Step {
    /// The stage that follows `self` when the tick outcome is `OK`
    /// (or the stage is not `review`, where the verdict is implicitly `OK`).
    ///
    /// `review` with a `NEEDS_CHANGES` verdict is handled separately by the
    /// caller (the "boomerang" back to `implement`); this method always
    /// returns the forward-progress successor.
    pub fn next_on_ok(self) -> Step {
        match self {
            Step::Plan => Step::Implement,
            Step::Implement => Step::Test,
            Step::Test => Step::Review,
            Step::Review => Step::Done,
            Step::Done => Step::Done,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Plan => "plan",
            Step::Implement => "implement",
            Step::Test => "test",
            Step::Review => "review",
            Step::Done => "done",
        }
    }
}

impl Default for Step {
    fn default() -> Self {
        Step::Plan
    }
}

/// The durable, CAS-protected state document for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Schema/CAS version. Incremented by exactly one on every committed write.
    pub version: u64,
    /// Monotonically increasing counter. Does not advance on boomerang
    /// (review+NEEDS_CHANGES→implement) or once `step == done`.
    pub turn: u64,
    /// The step this state document currently reflects.
    pub step: Step,
    /// Identifier of the task currently in flight, or empty when idle.
    #[serde(default)]
    pub wip: String,
    /// Expiry of the current task lease. `None` once the task reaches `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Map from stage name to the artifact path produced for it.
    #[serde(default)]
    pub last_artifacts: BTreeMap<String, PathBuf>,
    /// Free-form task-provided inputs, carried through ticks verbatim.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// Root directory under which per-turn artifacts are written.
    pub artifacts_dir: PathBuf,
}

impl State {
    /// A fresh, idle state document for a brand-new workspace.
    pub fn new(artifacts_dir: PathBuf) -> Self {
        Self {
            version: 0,
            turn: 0,
            step: Step::Plan,
            wip: String::new(),
            lease_expires_at: None,
            last_artifacts: BTreeMap::new(),
            inputs: BTreeMap::new(),
            artifacts_dir,
        }
    }

    /// Whether the task named by `wip` is currently held by a live lease.
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        !self.wip.is_empty() && self.lease_expires_at.is_some_and(|exp| exp > now)
    }

    /// A tick may take `task_id` if no task is in flight, the same task is
    /// already in flight, or the prior lease has expired.
    pub fn may_take(&self, task_id: &str, now: DateTime<Utc>) -> bool {
        self.wip.is_empty() || self.wip == task_id || !self.is_leased(now)
    }
}
