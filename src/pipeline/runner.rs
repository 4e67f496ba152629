//! Sequential stage execution with resume support.
//!
//! For each stage from `start_at`: load every declared input (a missing one
//! aborts before any LM call), ask the gate, execute, then persist outputs
//! atomically and record their digests in the manifest. Outputs of the first
//! stage run and every later stage are cleared before the gate is asked.
//! Nothing is retried here; a failure stops the run and leaves artifacts of
//! earlier stages untouched.
use super::{ConfirmGate, Pipeline, StageDescriptor, StageInputs};
use crate::error::{PipelineError, PipelineResult, StageFailure};
use crate::run::artifacts::{read_json_artifact, write_atomic};
use crate::run::{ArtifactDigest, RunHandle, StageRecord};
use crate::stages::StageContext;
use crate::util::sha256_hex;
use std::fs;
use std::io::ErrorKind;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every stage from the start ordinal completed.
    Completed { stages_run: usize },
    /// The operator declined before `ordinal`; nothing from it onward ran.
    Declined { stage: &'static str, ordinal: usize },
}

/// Execute `pipeline` on `run` starting at ordinal `start_at`.
pub fn run(
    pipeline: &Pipeline,
    ctx: &StageContext<'_>,
    run: &RunHandle,
    start_at: usize,
    gate: &mut dyn ConfirmGate,
) -> Result<RunOutcome, StageFailure> {
    let total = pipeline.len();
    let fail = |desc: &StageDescriptor, source: PipelineError| StageFailure {
        run_id: run.id().to_string(),
        stage: desc.name,
        ordinal: desc.ordinal,
        source,
    };
    if let Err(source) = pipeline.check_start(start_at) {
        return Err(StageFailure {
            run_id: run.id().to_string(),
            stage: "start",
            ordinal: start_at,
            source,
        });
    }

    let mut stages_run = 0;
    for stage in pipeline.stages().filter(|s| s.descriptor().ordinal >= start_at) {
        let desc = stage.descriptor();
        let inputs = load_inputs(run, desc).map_err(|err| fail(desc, err))?;
        if stages_run == 0 {
            invalidate_from(pipeline, run, desc.ordinal).map_err(|err| fail(desc, err))?;
        }

        if !gate.confirm(desc, total).map_err(|err| fail(desc, err))? {
            tracing::info!(run_id = run.id(), stage = desc.name, "stage declined by operator");
            return Ok(RunOutcome::Declined {
                stage: desc.name,
                ordinal: desc.ordinal,
            });
        }

        tracing::info!(
            run_id = run.id(),
            stage = desc.name,
            ordinal = desc.ordinal,
            inputs = inputs.len(),
            "stage start"
        );
        let start = Instant::now();
        let outputs = match stage.execute(ctx, &inputs) {
            Ok(outputs) => outputs,
            Err(err) => {
                retain_raw_response(run, desc, &err);
                return Err(fail(desc, err));
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        persist_outputs(run, desc, outputs, duration_ms).map_err(|err| fail(desc, err))?;
        tracing::info!(
            run_id = run.id(),
            stage = desc.name,
            elapsed_ms = duration_ms,
            "stage complete"
        );
        stages_run += 1;
    }
    Ok(RunOutcome::Completed { stages_run })
}

/// Remove the artifacts and manifest records of `ordinal` and every later
/// stage, so a halted or failed resume leaves no output from an earlier pass.
fn invalidate_from(pipeline: &Pipeline, run: &RunHandle, ordinal: usize) -> PipelineResult<()> {
    for desc in pipeline.descriptors().filter(|desc| desc.ordinal >= ordinal) {
        for spec in desc.outputs {
            let path = run.paths().artifact_path(spec);
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(artifact = spec.name, "stale artifact removed"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(PipelineError::io(format!("remove {}", path.display()), err)),
            }
        }
    }
    let mut manifest = run.load_manifest()?;
    if manifest.last_completed().is_some_and(|last| last >= ordinal) {
        manifest.forget_from(ordinal);
        run.write_manifest(&manifest)?;
    }
    Ok(())
}

fn load_inputs(run: &RunHandle, desc: &StageDescriptor) -> PipelineResult<StageInputs> {
    let mut inputs = StageInputs::default();
    for spec in desc.inputs {
        let path = run.paths().artifact_path(spec);
        let value = read_json_artifact(&path, spec.name)?;
        inputs.insert(spec, value);
    }
    Ok(inputs)
}

fn persist_outputs(
    run: &RunHandle,
    desc: &StageDescriptor,
    outputs: super::StageOutputs,
    duration_ms: u64,
) -> PipelineResult<()> {
    for spec in desc.outputs {
        if outputs.get(spec).is_none() {
            return Err(PipelineError::InvalidChain(format!(
                "stage `{}` did not produce declared artifact `{}`",
                desc.name, spec.name
            )));
        }
    }

    let mut digests = Vec::new();
    for (spec, data) in outputs.into_items() {
        if !desc.outputs.contains(&spec) {
            return Err(PipelineError::InvalidChain(format!(
                "stage `{}` produced undeclared artifact `{}`",
                desc.name, spec.name
            )));
        }
        let bytes = data.to_bytes()?;
        let path = run.paths().artifact_path(&spec);
        write_atomic(&path, &bytes)?;
        tracing::debug!(artifact = spec.name, bytes = bytes.len(), "artifact written");
        digests.push(ArtifactDigest {
            name: spec.name.to_string(),
            file: spec.file_name(run.id()),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
        });
    }

    let mut manifest = run.load_manifest()?;
    manifest.record_stage(StageRecord {
        name: desc.name.to_string(),
        ordinal: desc.ordinal,
        completed_at: chrono::Local::now().to_rfc3339(),
        duration_ms,
        artifacts: digests,
    });
    run.write_manifest(&manifest)
}

fn retain_raw_response(run: &RunHandle, desc: &StageDescriptor, err: &PipelineError) {
    let Some(raw) = err.raw_response() else {
        return;
    };
    let path = run.paths().failure_path(desc.name);
    match write_atomic(&path, raw.as_bytes()) {
        Ok(()) => tracing::warn!(path = %path.display(), "malformed LM response retained"),
        Err(write_err) => tracing::warn!(error = %write_err, "could not retain malformed LM response"),
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
