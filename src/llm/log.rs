//! Per-run log of LM invocations.
//!
//! Entries are appended to `runs/<run_id>/lm_log.jsonl` as newline-delimited
//! JSON:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"stage":"scoring","label":"score:business_sales",...}
//! ```
//!
//! Only a short prompt preview is stored; credentials never reach this file.
use crate::error::{PipelineError, PipelineResult};
use crate::util::{now_epoch_ms, truncate_string};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Instant;

/// Current schema version for lm_log.jsonl entries.
pub const LM_LOG_SCHEMA_VERSION: u32 = 1;

const PROMPT_PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmOutcome {
    Success,
    /// Parsed only after structural repair.
    Repaired,
    Malformed,
    ServiceError,
}

impl std::fmt::Display for LmOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Repaired => write!(f, "repaired"),
            Self::Malformed => write!(f, "malformed"),
            Self::ServiceError => write!(f, "service_error"),
        }
    }
}

/// A single LM invocation log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmLogEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the invocation started.
    pub ts: u64,

    pub stage: String,

    /// Which call within the stage (e.g. `tagging:1-5`, `score:human_capital`).
    pub label: String,

    pub model_id: String,

    pub backend: String,

    pub duration_ms: u64,

    /// Transport attempts, including service-error retries.
    pub attempts: u32,

    pub outcome: LmOutcome,

    pub prompt_bytes: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
}

/// Builder for constructing LM log entries with timing.
pub struct LmLogBuilder {
    start: Instant,
    ts: u64,
    stage: String,
    label: String,
    model_id: String,
    backend: String,
    prompt_bytes: usize,
    prompt_preview: Option<String>,
}

impl LmLogBuilder {
    pub fn new(stage: &str, label: &str, model_id: &str, backend: String) -> Self {
        Self {
            start: Instant::now(),
            ts: now_epoch_ms(),
            stage: stage.to_string(),
            label: label.to_string(),
            model_id: model_id.to_string(),
            backend,
            prompt_bytes: 0,
            prompt_preview: None,
        }
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt_bytes = prompt.len();
        self.prompt_preview = Some(truncate_string(prompt, PROMPT_PREVIEW_BYTES));
        self
    }

    pub fn success(self, attempts: u32, response_bytes: usize, repaired: bool) -> LmLogEntry {
        let outcome = if repaired {
            LmOutcome::Repaired
        } else {
            LmOutcome::Success
        };
        self.build(attempts, outcome, Some(response_bytes), None)
    }

    pub fn failed(self, attempts: u32, error: &PipelineError) -> LmLogEntry {
        let outcome = match error {
            PipelineError::MalformedResponse { .. } => LmOutcome::Malformed,
            _ => LmOutcome::ServiceError,
        };
        let response_bytes = error.raw_response().map(str::len);
        self.build(attempts, outcome, response_bytes, Some(error.to_string()))
    }

    fn build(
        self,
        attempts: u32,
        outcome: LmOutcome,
        response_bytes: Option<usize>,
        error: Option<String>,
    ) -> LmLogEntry {
        LmLogEntry {
            schema_version: LM_LOG_SCHEMA_VERSION,
            ts: self.ts,
            stage: self.stage,
            label: self.label,
            model_id: self.model_id,
            backend: self.backend,
            duration_ms: self.start.elapsed().as_millis() as u64,
            attempts,
            outcome,
            prompt_bytes: self.prompt_bytes,
            response_bytes,
            error,
            prompt_preview: self.prompt_preview,
        }
    }
}

/// Append an entry to the log file.
pub fn append_lm_log(path: &Path, entry: &LmLogEntry) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| PipelineError::io(format!("create {}", parent.display()), err))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| PipelineError::io(format!("open {}", path.display()), err))?;
    let mut line =
        serde_json::to_string(entry).map_err(|err| PipelineError::json("serialize lm log entry", err))?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .map_err(|err| PipelineError::io(format!("write {}", path.display()), err))?;
    Ok(())
}

/// Load all entries, skipping lines that do not parse.
pub fn load_lm_log(path: &Path) -> PipelineResult<Vec<LmLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)
        .map_err(|err| PipelineError::io(format!("open {}", path.display()), err))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| PipelineError::io(format!("read {}", path.display()), err))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LmLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => tracing::warn!(error = %err, "skipping unreadable lm log line"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lm_log.jsonl");

        let ok = LmLogBuilder::new("scoring", "score:human_capital", "m", "mock".to_string())
            .with_prompt("prompt text")
            .success(1, 42, false);
        append_lm_log(&path, &ok).expect("append ok");

        let err = PipelineError::MalformedResponse {
            reason: "eof".to_string(),
            raw: "{\"a\"".to_string(),
        };
        let failed = LmLogBuilder::new("scoring", "feature:overall", "m", "mock".to_string())
            .with_prompt("p")
            .failed(1, &err);
        append_lm_log(&path, &failed).expect("append failed");

        let entries = load_lm_log(&path).expect("load");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, LmOutcome::Success);
        assert_eq!(entries[0].prompt_bytes, 11);
        assert_eq!(entries[1].outcome, LmOutcome::Malformed);
        assert_eq!(entries[1].response_bytes, Some(4));
    }

    #[test]
    fn prompt_preview_is_bounded() {
        let prompt = "x".repeat(2000);
        let entry = LmLogBuilder::new("s", "l", "m", "b".to_string())
            .with_prompt(&prompt)
            .success(1, 0, true);
        assert_eq!(entry.prompt_preview.map(|p| p.len()), Some(PROMPT_PREVIEW_BYTES));
        assert_eq!(entry.outcome, LmOutcome::Repaired);
    }

    #[test]
    fn load_missing_log_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_lm_log(&dir.path().join("none.jsonl")).expect("load").is_empty());
    }
}
