//! Run creation and lookup.
//!
//! A run id is `{company_code}_{YYYYMMDD_HHMMSS}`. The run directory is claimed
//! with an exclusive `create_dir`, so two runs started in the same second get
//! distinct ids (`_2`, `_3`, ...) instead of sharing a directory.
use super::artifacts::ArtifactSpec;
use super::manifest::{load_manifest, write_manifest, RunInputs, RunManifest};
use super::paths::RunPaths;
use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const MAX_ID_SUFFIX: usize = 1000;

/// Format the base run id for a company at a point in time.
pub fn run_id_for(company_code: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", company_code, at.format("%Y%m%d_%H%M%S"))
}

/// A run that exists on disk.
#[derive(Debug, Clone)]
pub struct RunHandle {
    paths: RunPaths,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        self.paths.run_id()
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn load_manifest(&self) -> PipelineResult<RunManifest> {
        load_manifest(&self.paths.manifest_path())
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> PipelineResult<()> {
        write_manifest(&self.paths.manifest_path(), manifest)
    }

    pub fn has_artifact(&self, spec: &ArtifactSpec) -> bool {
        self.paths.artifact_path(spec).is_file()
    }
}

/// Owns the `runs/` directory under the data root.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    data_dir: PathBuf,
}

impl RunRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    /// Create a fresh run for `company_code` and write its manifest.
    pub fn start_run(&self, company_code: &str, inputs: &RunInputs) -> PipelineResult<RunHandle> {
        validate_company_code(company_code)?;
        let runs_dir = self.runs_dir();
        fs::create_dir_all(&runs_dir)
            .map_err(|err| PipelineError::io(format!("create {}", runs_dir.display()), err))?;

        let base = run_id_for(company_code, Local::now());
        let run_id = claim_run_dir(&runs_dir, &base)?;
        let paths = RunPaths::new(&runs_dir, &run_id);
        fs::create_dir_all(paths.artifacts_dir()).map_err(|err| {
            PipelineError::io(format!("create {}", paths.artifacts_dir().display()), err)
        })?;

        let handle = RunHandle { paths };
        handle.write_manifest(&RunManifest::new(&run_id, company_code, inputs.clone()))?;
        tracing::info!(run_id = %run_id, company_code, "run started");
        Ok(handle)
    }

    /// Locate an existing run for resumption.
    ///
    /// `prior` lists the artifacts the requested start stage builds on. A run
    /// holding none of them cannot be resumed from that point and reports
    /// `RunNotFound`; a run missing only some of them resolves, and the stage
    /// runner names the absent artifact.
    pub fn resolve_run(&self, run_id: &str, prior: &[ArtifactSpec]) -> PipelineResult<RunHandle> {
        let not_found = |reason: String| PipelineError::RunNotFound {
            run_id: run_id.to_string(),
            reason,
        };
        if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
            return Err(not_found("not a valid run id".to_string()));
        }
        let paths = RunPaths::new(&self.runs_dir(), run_id);
        if !paths.root().is_dir() {
            return Err(not_found(format!("no run directory at {}", paths.root().display())));
        }
        if !paths.manifest_path().is_file() {
            return Err(not_found(format!(
                "manifest {} is missing",
                paths.manifest_path().display()
            )));
        }
        let handle = RunHandle { paths };
        if !prior.is_empty() && !prior.iter().any(|spec| handle.has_artifact(spec)) {
            return Err(not_found(format!(
                "none of the artifacts required to resume ({}) exist",
                prior.iter().map(|spec| spec.name).collect::<Vec<_>>().join(", ")
            )));
        }
        tracing::info!(run_id, "run resolved");
        Ok(handle)
    }
}

fn claim_run_dir(runs_dir: &Path, base: &str) -> PipelineResult<String> {
    for n in 1..=MAX_ID_SUFFIX {
        let candidate = if n == 1 {
            base.to_string()
        } else {
            format!("{base}_{n}")
        };
        match fs::create_dir(runs_dir.join(&candidate)) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(PipelineError::io(
                    format!("create run directory {candidate}"),
                    err,
                ))
            }
        }
    }
    Err(PipelineError::InvalidInput(format!(
        "could not claim a run directory for {base}"
    )))
}

fn validate_company_code(code: &str) -> PipelineResult<()> {
    if code.is_empty() {
        return Err(PipelineError::InvalidInput("company code is empty".to_string()));
    }
    if !code
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(PipelineError::InvalidInput(format!(
            "company code {code:?} may only contain ASCII letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_format() {
        let at = Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("valid local time");
        assert_eq!(run_id_for("1234", at), "1234_20260304_050607");
    }

    #[test]
    fn same_company_runs_get_distinct_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RunRegistry::new(dir.path());
        let first = registry.start_run("1234", &RunInputs::default()).expect("first");
        let second = registry.start_run("1234", &RunInputs::default()).expect("second");
        assert_ne!(first.id(), second.id());
        assert_ne!(first.paths().root(), second.paths().root());
        assert!(first.paths().manifest_path().is_file());
        assert!(second.paths().manifest_path().is_file());
    }

    #[test]
    fn claim_appends_suffix_on_collision() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(claim_run_dir(dir.path(), "42_x").expect("claim"), "42_x");
        assert_eq!(claim_run_dir(dir.path(), "42_x").expect("claim"), "42_x_2");
        assert_eq!(claim_run_dir(dir.path(), "42_x").expect("claim"), "42_x_3");
    }

    #[test]
    fn resolve_unknown_run_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RunRegistry::new(dir.path());
        let err = registry.resolve_run("9999_20260101_000000", &[]).expect_err("unknown");
        assert!(matches!(err, PipelineError::RunNotFound { .. }));
    }

    #[test]
    fn resolve_without_any_prior_artifact_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RunRegistry::new(dir.path());
        let run = registry.start_run("1234", &RunInputs::default()).expect("start");
        let prior = [ArtifactSpec::json("report_tagged")];
        let err = registry.resolve_run(run.id(), &prior).expect_err("nothing to resume");
        assert!(matches!(err, PipelineError::RunNotFound { .. }));
        registry.resolve_run(run.id(), &[]).expect("resolves from stage 1");
    }

    #[test]
    fn company_code_rejects_path_characters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = RunRegistry::new(dir.path());
        assert!(registry.start_run("../evil", &RunInputs::default()).is_err());
        assert!(registry.start_run("", &RunInputs::default()).is_err());
    }
}
