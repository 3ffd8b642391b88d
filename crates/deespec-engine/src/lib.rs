//! The Stage Engine: one tick of deespec's plan → implement → test →
//! review → done state machine.
//!
//! Structured as load → decide → act → persist, with a `Reporter`
//! injected so the CLI and tests can supply different sinks. This crate
//! holds none of its own locking — crash-safety comes entirely from
//! `deespec-store`'s write ordering (artifact(s) → journal → health →
//! state CAS); serializing concurrent callers is the supervisor's job,
//! one layer up.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use deespec_store::VarDir;
use deespec_types::journal::{ArtifactRef, Verdict};
use deespec_types::workflow::WorkflowDef;
use deespec_types::{Health, JournalRecord, Reporter, State, Step, Task};

/// How long a task lease lasts before another tick may reclaim it.
/// No fixed value is mandated; this is a deliberate choice recorded in
/// DESIGN.md. Since the process lock already serializes ticks within one host,
/// this mainly bounds how long a crashed supervisor's claim lingers.
pub const TASK_LEASE: Duration = Duration::from_secs(15 * 60);

/// Everything one tick needs besides the durable state it reads and
/// writes and the collaborators (`AgentInvoker`, `Reporter`) passed in
/// separately.
pub struct EngineContext {
    pub workspace_root: PathBuf,
    pub workflow: WorkflowDef,
    pub agent_id: String,
    pub agent_timeout: Duration,
    pub project_name: String,
    pub language: String,
    /// Whether the Picker's feedback drafts should be auto-registered
    /// in the same tick that produced them.
    pub auto_fb: bool,
}

impl EngineContext {
    pub fn var_dir(&self) -> VarDir {
        VarDir::new(&self.workspace_root)
    }

    /// `<workspace>/.deespec/artifacts`, used to seed a brand-new state
    /// document; once written, `State::artifacts_dir` is authoritative.
    pub fn default_artifacts_dir(&self) -> PathBuf {
        self.workspace_root.join(".deespec").join("artifacts")
    }
}

/// The outcome of one call to [`run_tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// `false` when the tick made no durable change to state: no task was
    /// ready to pick, or the state CAS lost a race. Neither case is a
    /// tick failure; the caller should not count it as an error.
    pub committed: bool,
    pub turn: u64,
    pub step: Step,
    pub decision: Option<Verdict>,
    pub error: String,
    pub elapsed: Duration,
}

impl TickOutcome {
    fn idle(elapsed: Duration) -> Self {
        Self {
            committed: false,
            turn: 0,
            step: Step::Plan,
            decision: None,
            error: String::new(),
            elapsed,
        }
    }
}

/// Run one tick of the Stage Engine against `ctx`. Crash-safe: by the
/// time this returns `Ok`, every write it made is durable on disk, in the
/// order artifact(s) → journal → health → state CAS.
///
/// Returns `Err` only for genuine I/O/filesystem failures below the
/// state CAS boundary (unexpected I/O errors, not business-level ones)
/// — agent failures, oversized prompts, and CAS conflicts are
/// all absorbed into `TickOutcome` so the supervisor's error taxonomy
/// only sees failures it should actually react to.
pub fn run_tick(
    ctx: &EngineContext,
    agent: &dyn deespec_agent::AgentInvoker,
    reporter: &mut dyn Reporter,
) -> Result<TickOutcome> {
    let start = Instant::now();
    let var = ctx.var_dir();

    let existing = deespec_store::read_state(&var)?;
    let expected_version = existing.as_ref().map(|s| s.version).unwrap_or(0);
    let mut state = existing.unwrap_or_else(|| State::new(ctx.default_artifacts_dir()));

    let mut pending_journal = Vec::new();

    if state.wip.is_empty() {
        let assignment = assign_next_task(ctx, &var, &state, reporter)?;
        pending_journal.extend(assignment.records);
        match assignment.selected {
            Some(task_id) => {
                state.wip = task_id;
                state.step = Step::Plan;
                state.lease_expires_at = Some(Utc::now() + lease_span());
            }
            None => {
                reporter.info("no ready task; skipping tick");
                for rec in &pending_journal {
                    deespec_store::append_journal(&var, rec)?;
                }
                return Ok(TickOutcome::idle(start.elapsed()));
            }
        }
    }

    let task = load_current_task(ctx, &state.wip)?;
    let current_step = state.step;
    reporter.info(&format!(
        "turn {} task {} stage {}",
        state.turn,
        task.id,
        current_step.as_str()
    ));

    let (output_text, error) = match build_prompt(ctx, &task, current_step, state.turn) {
        Ok(prompt) => match agent.invoke(&ctx.agent_id, &prompt, ctx.agent_timeout) {
            Ok(out) if !out.timed_out && out.exit_code == 0 => (out.text, String::new()),
            Ok(out) => {
                let msg = format!(
                    "agent '{}' exited {} (timed_out={})",
                    ctx.agent_id, out.exit_code, out.timed_out
                );
                (synthetic_failure_body(&msg, current_step), msg)
            }
            Err(e) => {
                let msg = e.to_string();
                (synthetic_failure_body(&msg, current_step), msg)
            }
        },
        Err(e) => {
            let msg = e.to_string();
            (synthetic_failure_body(&msg, current_step), msg)
        }
    };

    if !error.is_empty() {
        reporter.error(&format!("tick error: {error}"));
    }

    let verdict = if current_step == Step::Review {
        let pattern = ctx
            .workflow
            .stage(Step::Review)
            .and_then(|s| s.decision_regex.as_deref());
        deespec_review::decode_with_pattern(&output_text, pattern)
            .context("configured decision regex failed to compile")?
    } else {
        Verdict::Ok
    };

    let boomerang = current_step == Step::Review && verdict == Verdict::NeedsChanges;
    let next_step = if boomerang {
        Step::Implement
    } else {
        current_step.next_on_ok()
    };

    let artifacts_dir = state.artifacts_dir.clone();
    let turn_dir = artifacts_dir.join(format!("turn{}", state.turn));
    let artifact_path = turn_dir.join(format!("{}.md", next_step.as_str()));
    deespec_store::write_artifact(&artifact_path, output_text.as_bytes())?;

    let mut artifacts = vec![ArtifactRef::path(rel(&artifacts_dir, &artifact_path))];

    if current_step == Step::Review {
        let note_path = turn_dir.join("review_note.md");
        let note = render_review_note(&output_text, state.turn, verdict);
        deespec_store::write_artifact(&note_path, note.as_bytes())?;
        artifacts.push(ArtifactRef::path(rel(&artifacts_dir, &note_path)));
    }

    let new_turn = if current_step == Step::Done || boomerang {
        state.turn
    } else {
        state.turn + 1
    };

    pending_journal.push(JournalRecord {
        ts: Utc::now(),
        turn: new_turn,
        step: next_step,
        task_id: Some(task.id.clone()),
        decision: if current_step == Step::Review {
            Some(verdict)
        } else {
            None
        },
        elapsed_ms: start.elapsed().as_millis() as u64,
        error: error.clone(),
        artifacts,
    });

    for rec in &pending_journal {
        deespec_store::append_journal(&var, rec)?;
    }

    let health = if error.is_empty() {
        Health::ok(new_turn, next_step)
    } else {
        Health::failed(new_turn, next_step, error.clone())
    };
    deespec_store::write_health(&var, &health)?;

    state.turn = new_turn;
    state.step = next_step;
    state
        .last_artifacts
        .insert(next_step.as_str().to_string(), artifact_path.clone());
    if next_step == Step::Done {
        reporter.info(&format!("task {} done at turn {}", task.id, new_turn));
        state.wip.clear();
        state.lease_expires_at = None;
    } else {
        state.lease_expires_at = Some(Utc::now() + lease_span());
    }

    let committed = match deespec_store::write_state_cas(&var, state, expected_version) {
        Ok(_) => true,
        Err(e) if e.downcast_ref::<deespec_store::StoreError>().is_some() => {
            reporter.warn("state CAS conflict; tick discarded, will retry next cadence");
            false
        }
        Err(e) => return Err(e),
    };

    Ok(TickOutcome {
        committed,
        turn: new_turn,
        step: next_step,
        decision: if current_step == Step::Review {
            Some(verdict)
        } else {
            None
        },
        error,
        elapsed: start.elapsed(),
    })
}

fn lease_span() -> chrono::Duration {
    chrono::Duration::from_std(TASK_LEASE).expect("TASK_LEASE fits in chrono::Duration")
}

/// The outcome of one Picker pass inside a tick: the selected task's id
/// (if any) plus every journal record raised along the way. `records` is
/// populated independently of `selected` — a round that finds no ready
/// task (e.g. every candidate is cycle-ineligible) still needs its
/// `fb_sbi_draft`/`fb_sbi_registered` records appended to the journal.
struct Assignment {
    selected: Option<String>,
    records: Vec<JournalRecord>,
}

/// Runs the Picker over the current spec tree, persists any feedback
/// drafts it raises (and auto-registers them when `ctx.auto_fb` is set),
/// and returns the selected task's id (if any) plus the journal records
/// the caller still needs to append, regardless of whether a task was
/// selected.
fn assign_next_task(
    ctx: &EngineContext,
    var: &VarDir,
    state: &State,
    reporter: &mut dyn Reporter,
) -> Result<Assignment> {
    let tasks = deespec_picker::load_tasks(&ctx.workspace_root)?;
    let journal = deespec_store::read_journal(var)?;
    let completed = deespec_picker::completed_task_ids(&journal);
    let result = deespec_picker::pick_in(&tasks, &completed, Some(&ctx.workspace_root));

    let mut records = Vec::new();
    let mut journal_snapshot = journal;

    for draft in &result.drafts {
        let paths = deespec_feedback::write_draft(&state.artifacts_dir, draft)?;
        let rec = deespec_feedback::draft_journal_record(draft, state.turn, &paths);
        reporter.warn(&format!(
            "feedback draft {}: {} on {}",
            draft.suggested_fb_id,
            draft.reason_code.as_str(),
            draft.target_task_id
        ));
        journal_snapshot.push(rec.clone());
        records.push(rec);

        if ctx.auto_fb
            && let Some(reg) =
                deespec_feedback::auto_register(&journal_snapshot, &draft.target_task_id, state.turn)
        {
            reporter.info(&format!("auto-registered feedback for {}", draft.target_task_id));
            journal_snapshot.push(reg.clone());
            records.push(reg);
        }
    }

    Ok(Assignment {
        selected: result.selected.map(|t| t.id),
        records,
    })
}

fn load_current_task(ctx: &EngineContext, id: &str) -> Result<Task> {
    let tasks = deespec_picker::load_tasks(&ctx.workspace_root)?;
    tasks
        .into_iter()
        .find(|t| t.id == id)
        .with_context(|| format!("task '{id}' named by state.wip was not found in the spec tree"))
}

/// Render the stage template for `step` (substituting the fixed
/// placeholder set) and append the task's own prompt content. Refuses
/// (returns `Err`) when the rendered prompt exceeds the workflow's
/// configured size cap.
fn build_prompt(ctx: &EngineContext, task: &Task, step: Step, turn: u64) -> Result<String> {
    let stage_def = ctx
        .workflow
        .stage(step)
        .with_context(|| format!("workflow definition has no stage entry for '{}'", step.as_str()))?;

    let template_path = ctx.workspace_root.join(&stage_def.prompt_path);
    let mut rendered = fs::read_to_string(&template_path)
        .with_context(|| format!("failed to read stage template {}", template_path.display()))?;

    rendered = rendered.replace("{turn}", &turn.to_string());
    rendered = rendered.replace("{task_id}", &task.id);
    rendered = rendered.replace("{project_name}", &ctx.project_name);
    rendered = rendered.replace("{language}", &ctx.language);

    let task_prompt_path = ctx.workspace_root.join(&task.prompt_path);
    if let Ok(task_prompt) = fs::read_to_string(&task_prompt_path) {
        rendered.push_str("\n\n---\n\n");
        rendered.push_str(&task_prompt);
    }

    let max_bytes = ctx.workflow.max_prompt_kb.saturating_mul(1024);
    if rendered.len() as u64 > max_bytes {
        anyhow::bail!(
            "rendered prompt for stage '{}' is {} bytes, exceeding the {} byte limit",
            step.as_str(),
            rendered.len(),
            max_bytes
        );
    }

    Ok(rendered)
}

fn synthetic_failure_body(error: &str, step: Step) -> String {
    if step == Step::Review {
        format!("Tick failed: {error}\n\nDECISION: NEEDS_CHANGES\n")
    } else {
        format!("Tick failed: {error}\n")
    }
}

/// Up to five non-empty output lines, verbatim, a detection timestamp,
/// the turn, and the verdict as the trailing line. No sanitization is
/// performed on these lines; see DESIGN.md.
fn render_review_note(output: &str, turn: u64, verdict: Verdict) -> String {
    let bullets: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).take(5).collect();

    let mut out = format!("# Review — turn {turn}\n\n_{}_\n\n", Utc::now().to_rfc3339());
    for b in bullets {
        out.push_str("- ");
        out.push_str(b);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(match verdict {
        Verdict::Ok => "DECISION: OK\n",
        Verdict::NeedsChanges => "DECISION: NEEDS_CHANGES\n",
    });
    out
}

fn rel(base: &Path, path: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_failure_body_carries_a_needs_changes_trailer_only_for_review() {
        assert!(synthetic_failure_body("boom", Step::Review).ends_with("DECISION: NEEDS_CHANGES\n"));
        assert!(!synthetic_failure_body("boom", Step::Implement).contains("DECISION"));
    }

    #[test]
    fn render_review_note_caps_at_five_bullets_and_trails_with_decision() {
        let output = (1..=10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let note = render_review_note(&output, 3, Verdict::Ok);
        assert_eq!(note.matches("- line").count(), 5);
        assert!(note.trim_end().ends_with("DECISION: OK"));
    }

    #[test]
    fn rel_strips_the_artifacts_dir_prefix() {
        let base = Path::new("/ws/.deespec/artifacts");
        let full = Path::new("/ws/.deespec/artifacts/turn0/plan.md");
        assert_eq!(rel(base, full), "turn0/plan.md");
    }
}
