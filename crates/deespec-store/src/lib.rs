//! Durable store for deespec's state, health, journal, and artifact files.
//!
//! All writers are atomic: data is written to a sibling `*.tmp` path,
//! fsynced, then renamed over the destination, with a best-effort fsync of
//! the parent directory afterward so the rename survives a crash.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use deespec_types::{Health, JournalRecord, State};
use thiserror::Error;

pub const STATE_FILE: &str = "state.json";
pub const HEALTH_FILE: &str = "health.json";
pub const JOURNAL_FILE: &str = "journal.ndjson";

/// Errors the caller is expected to match on, as opposed to generic I/O
/// failures that flow through as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state CAS conflict: expected version {expected}, found {found}")]
    CasConflict { expected: u64, found: u64 },
}

/// The `<workspace>/.deespec/var/` directory: state, health, journal, lock.
#[derive(Debug, Clone)]
pub struct VarDir(PathBuf);

impl VarDir {
    pub fn new(workspace: &Path) -> Self {
        Self(workspace.join(".deespec").join("var"))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn state_path(&self) -> PathBuf {
        self.0.join(STATE_FILE)
    }

    pub fn health_path(&self) -> PathBuf {
        self.0.join(HEALTH_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.0.join(JOURNAL_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.0.join("state.lock")
    }
}

/// Read the current state document, or `None` if the workspace has never
/// been ticked.
pub fn read_state(dir: &VarDir) -> Result<Option<State>> {
    let path = dir.state_path();
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let state: State = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse state JSON {}", path.display()))?;
    Ok(Some(state))
}

/// CAS-write a new state document. Fails with `StoreError::CasConflict`
/// when the version on disk does not match `expected_version`; on success
/// `new.version` is forced to `expected_version + 1` before it is written.
pub fn write_state_cas(dir: &VarDir, mut new: State, expected_version: u64) -> Result<State> {
    fs::create_dir_all(dir.path())
        .with_context(|| format!("failed to create var dir {}", dir.path().display()))?;

    let found = read_state(dir)?.map(|s| s.version).unwrap_or(0);
    if found != expected_version {
        return Err(StoreError::CasConflict {
            expected: expected_version,
            found,
        }
        .into());
    }

    new.version = expected_version + 1;
    atomic_write_json(&dir.state_path(), &new)?;
    Ok(new)
}

/// Overwrite the health document. Called every tick, whether it succeeded
/// or not.
pub fn write_health(dir: &VarDir, health: &Health) -> Result<()> {
    fs::create_dir_all(dir.path())
        .with_context(|| format!("failed to create var dir {}", dir.path().display()))?;
    atomic_write_json(&dir.health_path(), health)
}

/// Append one record to the journal. Durable (fsynced) before returning,
/// since a tick is not considered committed until its journal entry is on
/// disk.
pub fn append_journal(dir: &VarDir, record: &JournalRecord) -> Result<()> {
    fs::create_dir_all(dir.path())
        .with_context(|| format!("failed to create var dir {}", dir.path().display()))?;

    let path = dir.journal_path();
    let line = serde_json::to_string(record).context("failed to serialize journal record")?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open journal file {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to fsync journal file {}", path.display()))?;

    Ok(())
}

/// Read every journal record currently on disk, in append order.
pub fn read_journal(dir: &VarDir) -> Result<Vec<JournalRecord>> {
    let path = dir.journal_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read journal file {}", path.display()))?;

    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JournalRecord = serde_json::from_str(line).with_context(|| {
            format!(
                "failed to parse journal line {} from {}",
                lineno + 1,
                path.display()
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Write an artifact file atomically under its parent directory, creating
/// the parent directory as needed.
pub fn write_artifact(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create artifacts dir {}", parent.display()))?;
    }
    atomic_write_bytes(path, contents)
}

/// Best-effort fsync of the parent directory, so a rename is durable
/// across a crash. Errors are ignored: not every platform supports
/// opening a directory for sync.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;
    fsync_parent_dir(path);
    Ok(())
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    atomic_write_bytes(path, &data)
}

/// `true` when a stray state file exists without ever having completed a
/// tick cycle — i.e. state exists but the journal is empty. Mirrors the
/// "incomplete state" check the durable store exposes so callers can
/// distinguish a fresh workspace from one recovering mid-flight.
pub fn has_uncommitted_state(dir: &VarDir) -> bool {
    dir.state_path().exists() && !dir.journal_path().exists()
}

/// Convenience: the current UTC instant, exposed so callers that build
/// `Health`/`JournalRecord` values without going through their `::ok`/
/// `::failed` constructors share one clock source.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_types::Step;
    use tempfile::tempdir;

    #[test]
    fn read_state_returns_none_for_a_fresh_workspace() {
        let td = tempdir().expect("tempdir");
        let dir = VarDir::new(td.path());
        assert!(read_state(&dir).expect("read").is_none());
    }

    #[test]
    fn write_state_cas_succeeds_on_matching_version_and_bumps_it() {
        let td = tempdir().expect("tempdir");
        let dir = VarDir::new(td.path());
        let s = State::new(PathBuf::from("artifacts"));

        let written = write_state_cas(&dir, s, 0).expect("cas write");
        assert_eq!(written.version, 1);

        let reread = read_state(&dir).expect("read").expect("some");
        assert_eq!(reread.version, 1);
    }

    #[test]
    fn write_state_cas_fails_on_stale_expected_version() {
        let td = tempdir().expect("tempdir");
        let dir = VarDir::new(td.path());
        let s = State::new(PathBuf::from("artifacts"));
        write_state_cas(&dir, s.clone(), 0).expect("first write");

        let err = write_state_cas(&dir, s, 0).unwrap_err();
        let cas = err.downcast_ref::<StoreError>().expect("cas error");
        match cas {
            StoreError::CasConflict { expected, found } => {
                assert_eq!(*expected, 0);
                assert_eq!(*found, 1);
            }
        }
    }

    #[test]
    fn append_journal_appends_one_line_per_record() {
        let td = tempdir().expect("tempdir");
        let dir = VarDir::new(td.path());
        let rec = JournalRecord {
            ts: Utc::now(),
            turn: 0,
            step: Step::Implement,
            task_id: Some("T1".to_string()),
            decision: None,
            elapsed_ms: 10,
            error: String::new(),
            artifacts: vec![],
        };
        append_journal(&dir, &rec).expect("append 1");
        append_journal(&dir, &rec).expect("append 2");

        let records = read_journal(&dir).expect("read");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn write_artifact_creates_parent_dirs_and_content() {
        let td = tempdir().expect("tempdir");
        let path = td.path().join("turn0").join("plan.md");
        write_artifact(&path, b"hello").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "hello");
    }

    #[test]
    fn has_uncommitted_state_true_only_when_state_exists_without_journal() {
        let td = tempdir().expect("tempdir");
        let dir = VarDir::new(td.path());
        assert!(!has_uncommitted_state(&dir));

        let s = State::new(PathBuf::from("artifacts"));
        write_state_cas(&dir, s, 0).expect("write");
        assert!(has_uncommitted_state(&dir));
    }
}
