//! Process-level file lock. The supervisor refuses to run a tick without
//! holding this lock; it is the sole host-level mutex in the system.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors the caller is expected to match on.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock already held by pid {pid} on {hostname} since {acquired_at}")]
    AlreadyHeld {
        pid: u32,
        hostname: String,
        acquired_at: DateTime<Utc>,
    },
}

/// Metadata recorded in the lock file about its holder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}

/// A held process lock. The lock is released when this value is dropped,
/// on every exit path including panics.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock at `path`, failing with `LockError::AlreadyHeld`
    /// if it is already held.
    pub fn acquire(path: &Path) -> Result<Self> {
        if path.exists() {
            let info = read_lock_info(path)?;
            return Err(LockError::AlreadyHeld {
                pid: info.pid,
                hostname: info.hostname,
                acquired_at: info.acquired_at,
            }
            .into());
        }

        write_lock_info(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Non-blocking probe: returns `None` instead of erroring when the
    /// lock is already held, so a tick can be skipped rather than failing.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        match Self::acquire(path) {
            Ok(lock) => Ok(Some(lock)),
            Err(e) if e.downcast_ref::<LockError>().is_some() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Acquire the lock, first removing it if it is older than `timeout`
    /// (a crashed holder leaves its lock file behind forever otherwise).
    pub fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
        if path.exists() {
            match read_lock_info(path) {
                Ok(info) => {
                    let age = Utc::now() - info.acquired_at;
                    if age.num_seconds().unsigned_abs() > timeout.as_secs() {
                        fs::remove_file(path).with_context(|| {
                            format!("failed to remove stale lock file {}", path.display())
                        })?;
                    }
                }
                Err(_) => {
                    fs::remove_file(path).with_context(|| {
                        format!("failed to remove corrupt lock file {}", path.display())
                    })?;
                }
            }
        }
        Self::acquire(path)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock file {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn is_locked(path: &Path) -> bool {
        path.exists()
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn write_lock_info(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create lock dir {}", parent.display()))?;
    }

    let info = LockInfo {
        pid: std::process::id(),
        hostname: gethostname::gethostname().to_string_lossy().to_string(),
        acquired_at: Utc::now(),
    };

    let tmp = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(&info).context("failed to serialize lock info")?;
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create lock tmp file {}", tmp.display()))?;
        f.write_all(json.as_bytes())
            .with_context(|| format!("failed to write lock tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename lock file to {}", path.display()))?;
    Ok(())
}

fn read_lock_info(path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read lock file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))
}
