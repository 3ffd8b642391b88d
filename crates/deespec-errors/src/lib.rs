//! Classifies a tick error message into a class the supervisor can act on.
//!
//! Classification is deliberately dumb substring matching, not structured
//! error types: errors arrive from an opaque external agent process and
//! from filesystem I/O, so the only thing we can reliably inspect is the
//! rendered message.

use serde::{Deserialize, Serialize};

/// How the supervisor should react to a tick error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Keep going; likely to clear up on its own.
    Temporary,
    /// Keep going; needs an operator to fix configuration, but isn't fatal
    /// to the process.
    Configuration,
    /// Stop the supervisor loop.
    Critical,
}

const TEMPORARY_SUBSTRINGS: &[&str] =
    &["connection refused", "timeout", "permission denied", "no such file"];

const CONFIGURATION_SUBSTRINGS: &[&str] = &["config", "invalid flag", "missing required"];

const CRITICAL_SUBSTRINGS: &[&str] = &["out of memory", "disk full", "corrupted"];

/// Classify `message` by substring, case-insensitively. Unmatched messages
/// default to `Temporary`.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if CRITICAL_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return ErrorClass::Critical;
    }
    if CONFIGURATION_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return ErrorClass::Configuration;
    }
    if TEMPORARY_SUBSTRINGS.iter().any(|s| lower.contains(s)) {
        return ErrorClass::Temporary;
    }
    ErrorClass::Temporary
}
