//! Append-only per-tick journal records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::Step;

/// A reference to a tick's artifact: either a bare path or a structured
/// record carrying a `type` tag (used by feedback-draft/registration
/// entries). Untagged so plain paths round-trip as plain JSON strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactRef {
    Path(String),
    Typed {
        #[serde(rename = "type")]
        kind: String,
        path: String,
    },
}

impl ArtifactRef {
    pub fn path(p: impl Into<String>) -> Self {
        ArtifactRef::Path(p.into())
    }

    pub fn typed(kind: impl Into<String>, path: impl Into<String>) -> Self {
        ArtifactRef::Typed {
            kind: kind.into(),
            path: path.into(),
        }
    }
}

/// The verdict recorded for a review tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ok,
    NeedsChanges,
}

/// One append-only record per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ts: DateTime<Utc>,
    pub turn: u64,
    /// The *next* stage reached by this tick, not the stage that ran.
    pub step: Step,
    /// The task this tick advanced. Not part of the distilled schema but
    /// required to compute the Picker's completed-task set from the
    /// journal alone; see DESIGN.md.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Verdict>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_round_trips_as_a_bare_json_string() {
        let r = ArtifactRef::path("turn0/implement.md");
        let json = serde_json::to_string(&r).expect("serialize");
        assert_eq!(json, "\"turn0/implement.md\"");
        let back: ArtifactRef = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(r, back);
    }

    #[test]
    fn typed_ref_round_trips() {
        let r = ArtifactRef::typed("fb_sbi_draft", "fb_sbi/T1/draft.yaml");
        let json = serde_json::to_string(&r).expect("serialize");
        let back: ArtifactRef = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(r, back);
        assert!(json.contains("\"type\":\"fb_sbi_draft\""));
    }

    #[test]
    fn journal_record_round_trips() {
        let rec = JournalRecord {
            ts: Utc::now(),
            turn: 3,
            step: Step::Done,
            task_id: Some("T1".to_string()),
            decision: Some(Verdict::Ok),
            elapsed_ms: 1200,
            error: String::new(),
            artifacts: vec![ArtifactRef::path("turn3/done.md")],
        };
        let json = serde_json::to_string(&rec).expect("serialize");
        let back: JournalRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(rec, back);
    }
}
