//! The `run.json` manifest.
//!
//! Records what a run was started with and which stages completed, with a
//! digest of every artifact they wrote. Resume reads the recorded inputs so
//! the operator only has to pass `--run-id`.
use super::artifacts::{read_json_artifact, write_json_atomic};
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Source files and settings a run was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlook: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fewshot: Option<bool>,
}

impl RunInputs {
    /// Fill unset fields from `recorded`; explicitly passed values win.
    pub fn merged_over(self, recorded: &RunInputs) -> RunInputs {
        RunInputs {
            document: self.document.or_else(|| recorded.document.clone()),
            csv: self.csv.or_else(|| recorded.csv.clone()),
            catalog: self.catalog.or_else(|| recorded.catalog.clone()),
            outlook: self.outlook.or_else(|| recorded.outlook.clone()),
            model_id: self.model_id.or_else(|| recorded.model_id.clone()),
            fewshot: self.fewshot.or(recorded.fewshot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    pub name: String,
    pub file: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Completion record for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub ordinal: usize,
    pub completed_at: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDigest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub company_code: String,
    pub created_at: String,
    #[serde(default)]
    pub inputs: RunInputs,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
}

impl RunManifest {
    pub fn new(run_id: &str, company_code: &str, inputs: RunInputs) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: run_id.to_string(),
            company_code: company_code.to_string(),
            created_at: chrono::Local::now().to_rfc3339(),
            inputs,
            stages: Vec::new(),
        }
    }

    /// Replace the record for `record.ordinal`, keeping stages sorted.
    pub fn record_stage(&mut self, record: StageRecord) {
        self.stages.retain(|existing| existing.ordinal != record.ordinal);
        self.stages.push(record);
        self.stages.sort_by_key(|stage| stage.ordinal);
    }

    /// Drop the records of `ordinal` and every later stage.
    pub fn forget_from(&mut self, ordinal: usize) {
        self.stages.retain(|stage| stage.ordinal < ordinal);
    }

    /// Highest ordinal with a completion record.
    pub fn last_completed(&self) -> Option<usize> {
        self.stages.iter().map(|stage| stage.ordinal).max()
    }
}

pub fn load_manifest(path: &Path) -> PipelineResult<RunManifest> {
    let value = read_json_artifact(path, "run.json")?;
    let manifest: RunManifest = serde_json::from_value(value)
        .map_err(|err| PipelineError::json(format!("parse manifest {}", path.display()), err))?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(PipelineError::InvalidInput(format!(
            "{} has schema version {}, expected {}",
            path.display(),
            manifest.schema_version,
            MANIFEST_SCHEMA_VERSION
        )));
    }
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> PipelineResult<()> {
    write_json_atomic(path, manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ordinal: usize, completed_at: &str) -> StageRecord {
        StageRecord {
            name: format!("stage{ordinal}"),
            ordinal,
            completed_at: completed_at.to_string(),
            duration_ms: 1,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn record_stage_replaces_same_ordinal() {
        let mut manifest = RunManifest::new("r", "1234", RunInputs::default());
        manifest.record_stage(record(2, "first"));
        manifest.record_stage(record(1, "first"));
        manifest.record_stage(record(2, "second"));
        assert_eq!(manifest.stages.len(), 2);
        assert_eq!(manifest.stages[0].ordinal, 1);
        assert_eq!(manifest.stages[1].completed_at, "second");
        assert_eq!(manifest.last_completed(), Some(2));
    }

    #[test]
    fn forget_from_drops_that_stage_and_later() {
        let mut manifest = RunManifest::new("r", "1234", RunInputs::default());
        for ordinal in 1..=4 {
            manifest.record_stage(record(ordinal, "done"));
        }
        manifest.forget_from(3);
        assert_eq!(manifest.last_completed(), Some(2));
        manifest.forget_from(1);
        assert!(manifest.stages.is_empty());
    }

    #[test]
    fn explicit_inputs_win_when_merging() {
        let recorded = RunInputs {
            document: Some(PathBuf::from("a.pdf")),
            csv: Some(PathBuf::from("fs.csv")),
            model_id: Some("m1".to_string()),
            ..RunInputs::default()
        };
        let merged = RunInputs {
            model_id: Some("m2".to_string()),
            ..RunInputs::default()
        }
        .merged_over(&recorded);
        assert_eq!(merged.document, Some(PathBuf::from("a.pdf")));
        assert_eq!(merged.csv, Some(PathBuf::from("fs.csv")));
        assert_eq!(merged.model_id.as_deref(), Some("m2"));
    }

    #[test]
    fn manifest_roundtrip_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.json");
        let manifest = RunManifest::new("1234_x", "1234", RunInputs::default());
        write_manifest(&path, &manifest).expect("write");
        assert_eq!(load_manifest(&path).expect("load"), manifest);
    }
}
