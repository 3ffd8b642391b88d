//! Persists FB-SBI feedback drafts and idempotently auto-registers them.
//!
//! Drafts are written via `fs::create_dir_all` plus a plain write
//! (through `deespec_store::write_artifact`'s atomic tmp+rename, since
//! these are durable files too) rather than the CAS path, because
//! drafts are not CAS-protected. Auto-registration idempotency is
//! derived entirely from the journal already on disk — deriving status
//! from what's recorded rather than maintaining a separate index.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use deespec_types::{ArtifactRef, FeedbackDraft, JournalRecord, ReasonCode, Step};

pub const FB_SBI_DIR: &str = "fb_sbi";
pub const CONTEXT_FILE: &str = "context.md";
pub const EVIDENCE_FILE: &str = "evidence.txt";
pub const DRAFT_FILE: &str = "draft.yaml";

/// Artifact type tag recorded in `JournalRecord::artifacts` for a
/// newly-written draft.
pub const ARTIFACT_KIND_DRAFT: &str = "fb_sbi_draft";
/// Artifact type tag recorded in `JournalRecord::artifacts` once a draft
/// has been auto-registered.
pub const ARTIFACT_KIND_REGISTERED: &str = "fb_sbi_registered";

/// Paths written for one draft.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftPaths {
    pub context: PathBuf,
    pub evidence: PathBuf,
    pub draft: PathBuf,
}

/// `<artifacts>/fb_sbi/<target_id>/`.
pub fn draft_dir(artifacts_dir: &Path, target_task_id: &str) -> PathBuf {
    artifacts_dir.join(FB_SBI_DIR).join(target_task_id)
}

/// Write the three files that make up one feedback draft:
/// `context.md` (human-readable report), `evidence.txt` (key-value
/// record), `draft.yaml` (the registration payload template).
pub fn write_draft(artifacts_dir: &Path, draft: &FeedbackDraft) -> Result<DraftPaths> {
    let dir = draft_dir(artifacts_dir, &draft.target_task_id);

    let context = dir.join(CONTEXT_FILE);
    deespec_store::write_artifact(&context, render_context(draft).as_bytes())
        .with_context(|| format!("failed to write {}", context.display()))?;

    let evidence = dir.join(EVIDENCE_FILE);
    deespec_store::write_artifact(&evidence, render_evidence(draft).as_bytes())
        .with_context(|| format!("failed to write {}", evidence.display()))?;

    let draft_yaml = dir.join(DRAFT_FILE);
    deespec_store::write_artifact(&draft_yaml, render_draft_yaml(draft).as_bytes())
        .with_context(|| format!("failed to write {}", draft_yaml.display()))?;

    Ok(DraftPaths {
        context,
        evidence,
        draft: draft_yaml,
    })
}

/// The journal record to append immediately after [`write_draft`]
/// succeeds, with artifact type `fb_sbi_draft`.
pub fn draft_journal_record(draft: &FeedbackDraft, turn: u64, paths: &DraftPaths) -> JournalRecord {
    JournalRecord {
        ts: Utc::now(),
        turn,
        step: Step::Plan,
        task_id: Some(draft.target_task_id.clone()),
        decision: None,
        elapsed_ms: 0,
        error: String::new(),
        artifacts: vec![ArtifactRef::typed(
            ARTIFACT_KIND_DRAFT,
            paths.draft.display().to_string(),
        )],
    }
}

/// `true` if `target_task_id` already has a `fb_sbi_registered` entry
/// anywhere in the journal. Registration must never fire twice for the
/// same target regardless of how many drafts exist for it.
pub fn is_registered(journal: &[JournalRecord], target_task_id: &str) -> bool {
    journal.iter().any(|rec| {
        rec.artifacts.iter().any(|a| match a {
            ArtifactRef::Typed { kind, path } => {
                kind == ARTIFACT_KIND_REGISTERED && path.contains(target_task_id)
            }
            ArtifactRef::Path(_) => false,
        })
    })
}

/// Auto-register `target_task_id` if it is not already registered,
/// synthesizing a simulated registration id from `turn`. Collisions
/// across separate runs are accepted; a stronger id scheme is out of
/// scope (see DESIGN.md). Returns `None`
/// when the target is already registered (idempotent no-op).
pub fn auto_register(journal: &[JournalRecord], target_task_id: &str, turn: u64) -> Option<JournalRecord> {
    if is_registered(journal, target_task_id) {
        return None;
    }

    let simulated_id = format!("FB-{turn}-{target_task_id}");
    Some(JournalRecord {
        ts: Utc::now(),
        turn,
        step: Step::Plan,
        task_id: Some(target_task_id.to_string()),
        decision: None,
        elapsed_ms: 0,
        error: String::new(),
        artifacts: vec![ArtifactRef::typed(
            ARTIFACT_KIND_REGISTERED,
            format!("{FB_SBI_DIR}/{target_task_id}/{simulated_id}"),
        )],
    })
}

fn render_context(draft: &FeedbackDraft) -> String {
    format!(
        "# Feedback: {title}\n\n\
         - Reason: {reason}\n\
         - Target: {target}\n\
         - Detected at: {ts}\n\n\
         ## Summary\n\n{summary}\n\n\
         ## Reproduction\n\n\
         1. Re-run the Picker against the current spec tree.\n\
         2. Inspect task `{target}`'s metadata and dependency list.\n\
         3. Confirm the `{reason}` condition still holds.\n",
        title = draft.title,
        reason = draft.reason_code.as_str(),
        target = draft.target_task_id,
        ts = draft.created_at.to_rfc3339(),
        summary = draft.summary,
    )
}

fn render_evidence(draft: &FeedbackDraft) -> String {
    let mut out = format!(
        "target_task_id={}\nreason_code={}\ncreated_at={}\nsuggested_fb_id={}\n",
        draft.target_task_id,
        draft.reason_code.as_str(),
        draft.created_at.to_rfc3339(),
        draft.suggested_fb_id,
    );
    for (i, p) in draft.evidence_paths.iter().enumerate() {
        out.push_str(&format!("evidence_path[{i}]={}\n", p.display()));
    }
    out
}

fn render_draft_yaml(draft: &FeedbackDraft) -> String {
    format!(
        "suggested_fb_id: {fb_id}\n\
         title: \"{title}\"\n\
         target_task_id: {target}\n\
         reason_code: {reason}\n\
         priority: 0\n\
         labels:\n  - feedback\n  - pick\n  - sbi-fb\n\
         summary: \"{summary}\"\n",
        fb_id = draft.suggested_fb_id,
        title = draft.title,
        target = draft.target_task_id,
        reason = draft.reason_code.as_str(),
        summary = draft.summary.replace('"', "'"),
    )
}

/// Convenience re-export: the set of reason codes a feedback draft can
/// carry, so callers need not depend on `deespec-types` directly just to
/// match on it.
pub type Reason = ReasonCode;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn draft(target: &str) -> FeedbackDraft {
        FeedbackDraft {
            target_task_id: target.to_string(),
            reason_code: ReasonCode::DepCycle,
            title: format!("cycle on {target}"),
            summary: "a cycle was detected".to_string(),
            evidence_paths: vec![],
            suggested_fb_id: format!("FB-seed-{target}"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn write_draft_creates_all_three_files() {
        let td = tempdir().expect("tempdir");
        let paths = write_draft(td.path(), &draft("SBI-001")).expect("write");
        assert!(paths.context.exists());
        assert!(paths.evidence.exists());
        assert!(paths.draft.exists());
        assert!(paths.draft.parent().unwrap().ends_with("fb_sbi/SBI-001"));
    }

    #[test]
    fn context_file_contains_reason_and_target() {
        let td = tempdir().expect("tempdir");
        let d = draft("SBI-001");
        let paths = write_draft(td.path(), &d).expect("write");
        let content = std::fs::read_to_string(&paths.context).expect("read");
        assert!(content.contains("DEP_CYCLE"));
        assert!(content.contains("SBI-001"));
    }

    #[test]
    fn is_registered_false_on_an_empty_journal() {
        assert!(!is_registered(&[], "SBI-001"));
    }

    #[test]
    fn auto_register_produces_a_record_when_unregistered() {
        let rec = auto_register(&[], "SBI-001", 3).expect("should register");
        assert_eq!(rec.task_id.as_deref(), Some("SBI-001"));
        assert!(is_registered(&[rec], "SBI-001"));
    }

    #[test]
    fn auto_register_is_idempotent_once_registered() {
        let first = auto_register(&[], "SBI-001", 3).expect("first register");
        let journal = vec![first];
        assert!(auto_register(&journal, "SBI-001", 5).is_none());
    }

    #[test]
    fn auto_register_does_not_confuse_different_targets() {
        let first = auto_register(&[], "SBI-001", 3).expect("first register");
        let journal = vec![first];
        assert!(auto_register(&journal, "SBI-002", 5).is_some());
    }
}
