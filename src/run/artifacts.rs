//! Artifact identity and atomic persistence.
//!
//! Every write lands in a temporary file inside the destination directory and
//! is renamed into place, so an interrupted stage never leaves a truncated
//! artifact behind.
use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Docx,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Docx => "docx",
        }
    }
}

/// Static identity of an artifact produced by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub name: &'static str,
    pub format: ArtifactFormat,
}

impl ArtifactSpec {
    pub const fn json(name: &'static str) -> Self {
        Self {
            name,
            format: ArtifactFormat::Json,
        }
    }

    pub const fn docx(name: &'static str) -> Self {
        Self {
            name,
            format: ArtifactFormat::Docx,
        }
    }

    /// File name of this artifact for a given run.
    pub fn file_name(&self, run_id: &str) -> String {
        format!("{}_{}.{}", self.name, run_id, self.format.extension())
    }
}

/// Content produced for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactData {
    Json(Value),
    Binary(Vec<u8>),
}

impl ArtifactData {
    /// Serialize to the exact bytes stored on disk.
    pub fn to_bytes(&self) -> PipelineResult<Vec<u8>> {
        match self {
            Self::Json(value) => json_bytes(value),
            Self::Binary(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Pretty JSON with a trailing newline; the stored form of every JSON artifact.
pub fn json_bytes<T: Serialize>(value: &T) -> PipelineResult<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|err| PipelineError::json("serialize JSON", err))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| PipelineError::InvalidInput(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir).map_err(|err| PipelineError::io(format!("create {}", dir.display()), err))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| PipelineError::io(format!("create temp file in {}", dir.display()), err))?;
    tmp.write_all(bytes)
        .map_err(|err| PipelineError::io(format!("write {}", tmp.path().display()), err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| PipelineError::io(format!("sync {}", tmp.path().display()), err))?;
    tmp.persist(path)
        .map_err(|err| PipelineError::io(format!("persist {}", path.display()), err.error))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let bytes = json_bytes(value)?;
    write_atomic(path, &bytes)
}

/// Read a JSON artifact, reporting absence as a missing artifact.
pub fn read_json_artifact(path: &Path, artifact: &str) -> PipelineResult<Value> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::MissingArtifact {
                artifact: artifact.to_string(),
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(PipelineError::io(format!("read {}", path.display()), err)),
    };
    serde_json::from_slice(&bytes)
        .map_err(|err| PipelineError::json(format!("parse artifact {}", path.display()), err))
}
