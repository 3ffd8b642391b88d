//! Loads a workflow definition from TOML and validates it: every stage's
//! prompt file must be readable, regular, UTF-8, and within the size cap;
//! placeholders outside code spans must be in the allowed set; the
//! decision regex (if any) must compile.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use deespec_types::workflow::{ALLOWED_PLACEHOLDERS, WorkflowDef};
use regex::Regex;
use thiserror::Error;

pub const WORKFLOW_FILE: &str = "workflow.toml";

/// A validation failure severe enough to reject the workflow outright.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("stage {stage}: prompt path {path} does not exist or is not a regular file")]
    PromptMissing { stage: String, path: String },
    #[error("stage {stage}: prompt file {path} is not valid UTF-8")]
    PromptNotUtf8 { stage: String, path: String },
    #[error("stage {stage}: prompt file {path} is {size_kb} KiB, exceeding the {max_kb} KiB limit")]
    PromptTooLarge {
        stage: String,
        path: String,
        size_kb: u64,
        max_kb: u64,
    },
    #[error("stage {stage}: placeholder '{{{placeholder}}}' is not in the allowed set")]
    DisallowedPlaceholder { stage: String, placeholder: String },
    #[error("stage {stage}: decision regex failed to compile: {source}")]
    BadDecisionRegex {
        stage: String,
        #[source]
        source: regex::Error,
    },
}

/// Non-fatal observations surfaced alongside a successful validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationWarnings {
    pub messages: Vec<String>,
}

/// Load a workflow definition from a TOML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDef> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse workflow file {}", path.display()))
}

/// Walk up from `start_dir` looking for `workflow.toml`.
pub fn find_workflow_file(start_dir: &Path) -> Option<std::path::PathBuf> {
    let mut current = start_dir;
    loop {
        let candidate = current.join(WORKFLOW_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Validate a loaded workflow definition against prompt files resolved
/// relative to `base_dir`. Returns accumulated non-fatal warnings on
/// success, or the first validation error encountered.
pub fn validate(workflow: &WorkflowDef, base_dir: &Path) -> Result<ValidationWarnings, ValidationError> {
    let mut warnings = ValidationWarnings::default();

    for stage in &workflow.stages {
        let stage_name = stage.id.as_str().to_string();
        let prompt_path = base_dir.join(&stage.prompt_path);

        let metadata = fs::metadata(&prompt_path).map_err(|_| ValidationError::PromptMissing {
            stage: stage_name.clone(),
            path: prompt_path.display().to_string(),
        })?;
        if !metadata.is_file() {
            return Err(ValidationError::PromptMissing {
                stage: stage_name,
                path: prompt_path.display().to_string(),
            });
        }

        let size_kb = metadata.len().div_ceil(1024);
        if size_kb > workflow.max_prompt_kb {
            return Err(ValidationError::PromptTooLarge {
                stage: stage_name,
                path: prompt_path.display().to_string(),
                size_kb,
                max_kb: workflow.max_prompt_kb,
            });
        }

        let raw = fs::read(&prompt_path).map_err(|_| ValidationError::PromptMissing {
            stage: stage_name.clone(),
            path: prompt_path.display().to_string(),
        })?;
        let text = String::from_utf8(raw).map_err(|_| ValidationError::PromptNotUtf8 {
            stage: stage_name.clone(),
            path: prompt_path.display().to_string(),
        })?;

        if text.starts_with('\u{feff}') {
            warnings
                .messages
                .push(format!("stage {stage_name}: prompt file has a UTF-8 BOM"));
        }
        if text.contains("\r\n") {
            warnings
                .messages
                .push(format!("stage {stage_name}: prompt file uses CRLF line endings"));
        }

        for placeholder in scan_placeholders(&text) {
            if !ALLOWED_PLACEHOLDERS.contains(&placeholder.as_str()) {
                return Err(ValidationError::DisallowedPlaceholder {
                    stage: stage_name.clone(),
                    placeholder,
                });
            }
        }
        if text.contains("{{") {
            warnings
                .messages
                .push(format!("stage {stage_name}: mustache-style '{{{{...}}}}' usage found"));
        }

        if let Some(pattern) = &stage.decision_regex {
            Regex::new(pattern).map_err(|source| ValidationError::BadDecisionRegex {
                stage: stage_name.clone(),
                source,
            })?;
        }
    }

    Ok(warnings)
}

/// The decision regex the review decoder should use for `stage`: the
/// stage's configured override if present and valid, otherwise the
/// decoder's built-in default.
pub fn effective_decision_pattern(stage: &deespec_types::workflow::StageDef) -> String {
    stage
        .decision_regex
        .clone()
        .unwrap_or_else(|| deespec_review::DEFAULT_PATTERN.to_string())
}

/// Find every `{identifier}` placeholder in `text`, skipping fenced code
/// blocks (```...```), inline code spans (`...`), and `\{...\}` escapes.
fn scan_placeholders(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        out.extend(scan_placeholders_in_line(line));
    }
    out
}

fn scan_placeholders_in_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut in_inline_code = false;

    while i < bytes.len() {
        match bytes[i] {
            b'`' => {
                in_inline_code = !in_inline_code;
                i += 1;
            }
            b'\\' if i + 1 < bytes.len() && bytes[i + 1] == b'{' => {
                // `\{...\}` escape: skip past the matching `\}` if present.
                if let Some(end) = line[i..].find("\\}") {
                    i += end + 2;
                } else {
                    i += 2;
                }
            }
            b'{' if !in_inline_code => {
                if let Some(end) = line[i + 1..].find('}') {
                    let ident = &line[i + 1..i + 1 + end];
                    if !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        out.push(ident.to_string());
                    }
                    i += end + 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use deespec_types::state::Step;
    use deespec_types::workflow::StageDef;
    use tempfile::tempdir;

    fn stage(id: Step, prompt: &str) -> StageDef {
        StageDef {
            id,
            prompt_path: prompt.into(),
            decision_regex: None,
        }
    }

    #[test]
    fn scan_placeholders_finds_allowed_tokens() {
        let found = scan_placeholders("Hello {task_id}, turn {turn}.");
        assert_eq!(found, vec!["task_id".to_string(), "turn".to_string()]);
    }

    #[test]
    fn scan_placeholders_ignores_fenced_code() {
        let text = "before\n```\n{not_allowed}\n```\nafter {turn}";
        let found = scan_placeholders(text);
        assert_eq!(found, vec!["turn".to_string()]);
    }

    #[test]
    fn scan_placeholders_ignores_inline_code() {
        let found = scan_placeholders("see `{not_allowed}` but use {turn}");
        assert_eq!(found, vec!["turn".to_string()]);
    }

    #[test]
    fn scan_placeholders_ignores_escaped_braces() {
        let found = scan_placeholders(r"literal \{turn\} braces, real {task_id}");
        assert_eq!(found, vec!["task_id".to_string()]);
    }

    #[test]
    fn validate_accepts_a_well_formed_workflow() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("plan.md"), "Plan for {task_id} at turn {turn}.").unwrap();

        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "plan.md")],
            max_prompt_kb: 100,
        };

        let warnings = validate(&workflow, td.path()).expect("valid");
        assert!(warnings.messages.is_empty());
    }

    #[test]
    fn validate_rejects_disallowed_placeholders() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("plan.md"), "Use {not_allowed} here.").unwrap();

        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "plan.md")],
            max_prompt_kb: 100,
        };

        let err = validate(&workflow, td.path()).unwrap_err();
        assert!(matches!(err, ValidationError::DisallowedPlaceholder { .. }));
    }

    #[test]
    fn validate_rejects_missing_prompt_files() {
        let td = tempdir().expect("tempdir");
        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "missing.md")],
            max_prompt_kb: 100,
        };
        let err = validate(&workflow, td.path()).unwrap_err();
        assert!(matches!(err, ValidationError::PromptMissing { .. }));
    }

    #[test]
    fn validate_rejects_prompts_over_the_size_cap() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("plan.md"), "x".repeat(2048)).unwrap();

        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "plan.md")],
            max_prompt_kb: 1,
        };
        let err = validate(&workflow, td.path()).unwrap_err();
        assert!(matches!(err, ValidationError::PromptTooLarge { .. }));
    }

    #[test]
    fn validate_accepts_a_prompt_at_exactly_the_size_cap() {
        let td = tempdir().expect("tempdir");
        fs::write(td.path().join("plan.md"), "x".repeat(1024)).unwrap();

        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "plan.md")],
            max_prompt_kb: 1,
        };
        assert!(validate(&workflow, td.path()).is_ok());
    }

    #[test]
    fn validate_warns_on_bom_and_crlf() {
        let td = tempdir().expect("tempdir");
        let mut content = vec![0xEF, 0xBB, 0xBF];
        content.extend_from_slice(b"line one\r\nline two");
        fs::write(td.path().join("plan.md"), content).unwrap();

        let workflow = WorkflowDef {
            stages: vec![stage(Step::Plan, "plan.md")],
            max_prompt_kb: 100,
        };
        let warnings = validate(&workflow, td.path()).expect("valid with warnings");
        assert_eq!(warnings.messages.len(), 2);
    }

    #[test]
    fn effective_decision_pattern_falls_back_to_the_decoder_default() {
        let s = stage(Step::Review, "review.md");
        assert_eq!(effective_decision_pattern(&s), deespec_review::DEFAULT_PATTERN);
    }

    #[test]
    fn effective_decision_pattern_honors_an_override() {
        let mut s = stage(Step::Review, "review.md");
        s.decision_regex = Some("custom".to_string());
        assert_eq!(effective_decision_pattern(&s), "custom");
    }
}
