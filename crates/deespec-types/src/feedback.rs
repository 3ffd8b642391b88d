//! Feedback SBI (FB-SBI) drafts: emitted when the Picker detects an
//! incomplete instruction on a candidate task.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a feedback draft was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    DepUnresolved,
    DepCycle,
    MetaMissing,
    PathInvalid,
    PromptError,
    TimeFormat,
    JournalGuard,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::DepUnresolved => "DEP_UNRESOLVED",
            ReasonCode::DepCycle => "DEP_CYCLE",
            ReasonCode::MetaMissing => "META_MISSING",
            ReasonCode::PathInvalid => "PATH_INVALID",
            ReasonCode::PromptError => "PROMPT_ERROR",
            ReasonCode::TimeFormat => "TIME_FORMAT",
            ReasonCode::JournalGuard => "JOURNAL_GUARD",
        }
    }

    /// Reason codes that make a task ineligible for selection this round,
    /// as opposed to reasons that are merely recorded.
    pub fn blocks_selection(self) -> bool {
        matches!(self, ReasonCode::DepUnresolved | ReasonCode::DepCycle)
    }
}

/// A persisted feedback draft flagging an incomplete-instruction condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDraft {
    pub target_task_id: String,
    pub reason_code: ReasonCode,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub evidence_paths: Vec<PathBuf>,
    pub suggested_fb_id: String,
    pub created_at: DateTime<Utc>,
}
