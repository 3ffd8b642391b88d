//! The health document: overwritten every tick, success or failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::Step;

/// Health snapshot written after every tick, whether it succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// UTC timestamp with nanosecond precision, RFC3339 `Z`-suffixed.
    pub ts: DateTime<Utc>,
    pub turn: u64,
    pub step: Step,
    /// True iff `error` is empty.
    pub ok: bool,
    #[serde(default)]
    pub error: String,
}

impl Health {
    pub fn ok(turn: u64, step: Step) -> Self {
        Self {
            ts: Utc::now(),
            turn,
            step,
            ok: true,
            error: String::new(),
        }
    }

    pub fn failed(turn: u64, step: Step, error: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            turn,
            step,
            ok: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_matches_empty_error() {
        let h = Health::ok(1, Step::Implement);
        assert_eq!(h.ok, h.error.is_empty());
        assert!(h.ok);
    }

    #[test]
    fn failed_matches_nonempty_error() {
        let h = Health::failed(1, Step::Implement, "timeout");
        assert_eq!(h.ok, h.error.is_empty());
        assert!(!h.ok);
    }
}
