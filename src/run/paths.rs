//! Typed paths into a run directory.
//!
//! Layout under `<data_dir>/runs/<run_id>/`:
//!
//! ```text
//! run.json                       manifest (inputs, stage records, digests)
//! artifacts/<name>_<run_id>.json stage outputs
//! artifacts/report_<run_id>.docx rendered document
//! lm_log.jsonl                   one line per LM call
//! failures/<stage>_response.txt  raw text of a rejected LM response
//! ```
use super::artifacts::ArtifactSpec;
use std::path::{Path, PathBuf};

/// Convenience wrapper for locating the files of a single run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    root: PathBuf,
    run_id: String,
}

impl RunPaths {
    /// Create a path helper for `run_id` under `runs_dir`.
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            root: runs_dir.join(run_id),
            run_id: run_id.to_string(),
        }
    }

    /// Return the run directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Return the `run.json` manifest path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("run.json")
    }

    /// Return the `artifacts/` directory path.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Return the on-disk location of a stage artifact.
    pub fn artifact_path(&self, spec: &ArtifactSpec) -> PathBuf {
        self.artifacts_dir().join(spec.file_name(&self.run_id))
    }

    /// Return the `lm_log.jsonl` path.
    pub fn lm_log_path(&self) -> PathBuf {
        self.root.join("lm_log.jsonl")
    }

    /// Return the `failures/` directory path.
    pub fn failures_dir(&self) -> PathBuf {
        self.root.join("failures")
    }

    /// Return the retained raw response path for a failed stage.
    pub fn failure_path(&self, stage: &str) -> PathBuf {
        self.failures_dir().join(format!("{stage}_response.txt"))
    }
}
