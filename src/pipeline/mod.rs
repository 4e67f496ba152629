//! Stage descriptors, the stage trait, and the linear chain they form.
//!
//! The chain is an ordered list, not a graph: stage `n` may only consume
//! artifacts produced by stages `1..n`. [`Pipeline::new`] checks this once so
//! the runner can trust it.

pub mod gate;
pub mod runner;

pub use gate::{AutoApprove, ConfirmGate, TerminalGate};
pub use runner::{run, RunOutcome};

use crate::error::{PipelineError, PipelineResult};
use crate::run::{ArtifactData, ArtifactFormat, ArtifactSpec};
use crate::stages::StageContext;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Static metadata for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: &'static str,
    /// 1-based position in the chain.
    pub ordinal: usize,
    pub inputs: &'static [ArtifactSpec],
    pub outputs: &'static [ArtifactSpec],
}

/// Loaded input artifacts for one stage execution.
#[derive(Debug, Default)]
pub struct StageInputs {
    values: BTreeMap<&'static str, Value>,
}

impl StageInputs {
    pub fn insert(&mut self, spec: &ArtifactSpec, value: Value) {
        self.values.insert(spec.name, value);
    }

    pub fn get(&self, spec: &ArtifactSpec) -> PipelineResult<&Value> {
        self.values.get(spec.name).ok_or_else(|| {
            PipelineError::InvalidChain(format!("stage read undeclared input `{}`", spec.name))
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Artifacts produced by one stage execution.
#[derive(Debug, Default)]
pub struct StageOutputs {
    items: Vec<(ArtifactSpec, ArtifactData)>,
}

impl StageOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, spec: ArtifactSpec, value: Value) -> Self {
        self.items.push((spec, ArtifactData::Json(value)));
        self
    }

    pub fn with_binary(mut self, spec: ArtifactSpec, bytes: Vec<u8>) -> Self {
        self.items.push((spec, ArtifactData::Binary(bytes)));
        self
    }

    pub fn get(&self, spec: &ArtifactSpec) -> Option<&ArtifactData> {
        self.items
            .iter()
            .find(|(candidate, _)| candidate == spec)
            .map(|(_, data)| data)
    }

    pub fn into_items(self) -> Vec<(ArtifactSpec, ArtifactData)> {
        self.items
    }
}

/// A deterministic transform from input artifacts to output artifacts.
pub trait Stage {
    fn descriptor(&self) -> &StageDescriptor;

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs>;
}

/// A validated, ordered chain of stages.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> PipelineResult<Self> {
        let descriptors: Vec<&StageDescriptor> = stages.iter().map(|stage| stage.descriptor()).collect();
        validate_chain(&descriptors)?;
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(|stage| stage.as_ref())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter().map(|stage| stage.descriptor())
    }

    /// Reject a start ordinal outside the chain.
    pub fn check_start(&self, start_at: usize) -> PipelineResult<()> {
        if start_at == 0 || start_at > self.stages.len() {
            return Err(PipelineError::InvalidInput(format!(
                "start stage must be between 1 and {}, got {start_at}",
                self.stages.len()
            )));
        }
        Ok(())
    }

    /// Artifacts from earlier stages that stages `start_at..` consume.
    pub fn prior_inputs(&self, start_at: usize) -> Vec<ArtifactSpec> {
        let earlier: Vec<ArtifactSpec> = self
            .descriptors()
            .filter(|desc| desc.ordinal < start_at)
            .flat_map(|desc| desc.outputs.iter().copied())
            .collect();
        let mut needed = Vec::new();
        for desc in self.descriptors().filter(|desc| desc.ordinal >= start_at) {
            for spec in desc.inputs {
                if earlier.contains(spec) && !needed.contains(spec) {
                    needed.push(*spec);
                }
            }
        }
        needed
    }
}

/// Check ordinals are contiguous from 1 and every input is produced earlier.
pub fn validate_chain(descriptors: &[&StageDescriptor]) -> PipelineResult<()> {
    let mut produced: BTreeSet<&'static str> = BTreeSet::new();
    let mut names: BTreeSet<&'static str> = BTreeSet::new();
    for (idx, desc) in descriptors.iter().enumerate() {
        let expected = idx + 1;
        if desc.ordinal != expected {
            return Err(PipelineError::InvalidChain(format!(
                "stage `{}` has ordinal {}, expected {expected}",
                desc.name, desc.ordinal
            )));
        }
        if !names.insert(desc.name) {
            return Err(PipelineError::InvalidChain(format!(
                "stage name `{}` is used twice",
                desc.name
            )));
        }
        for input in desc.inputs {
            if !produced.contains(input.name) {
                return Err(PipelineError::InvalidChain(format!(
                    "stage {} (`{}`) requires `{}`, which no earlier stage produces",
                    desc.ordinal, desc.name, input.name
                )));
            }
            if input.format != ArtifactFormat::Json {
                return Err(PipelineError::InvalidChain(format!(
                    "stage `{}` consumes non-JSON artifact `{}`",
                    desc.name, input.name
                )));
            }
        }
        for output in desc.outputs {
            if !produced.insert(output.name) {
                return Err(PipelineError::InvalidChain(format!(
                    "artifact `{}` is produced by more than one stage",
                    output.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ArtifactSpec = ArtifactSpec::json("a");
    const B: ArtifactSpec = ArtifactSpec::json("b");
    const DOC: ArtifactSpec = ArtifactSpec::docx("doc");

    fn desc(name: &'static str, ordinal: usize, inputs: &'static [ArtifactSpec], outputs: &'static [ArtifactSpec]) -> StageDescriptor {
        StageDescriptor {
            name,
            ordinal,
            inputs,
            outputs,
        }
    }

    #[test]
    fn linear_chain_is_valid() {
        let one = desc("one", 1, &[], &[A]);
        let two = desc("two", 2, &[A], &[B]);
        let three = desc("three", 3, &[A, B], &[DOC]);
        validate_chain(&[&one, &two, &three]).expect("valid chain");
    }

    #[test]
    fn forward_reference_is_rejected() {
        let one = desc("one", 1, &[B], &[A]);
        let two = desc("two", 2, &[A], &[B]);
        let err = validate_chain(&[&one, &two]).expect_err("b is produced later");
        assert!(err.to_string().contains("`b`"));
    }

    #[test]
    fn gap_in_ordinals_is_rejected() {
        let one = desc("one", 1, &[], &[A]);
        let three = desc("three", 3, &[A], &[B]);
        assert!(validate_chain(&[&one, &three]).is_err());
    }

    #[test]
    fn duplicate_producer_is_rejected() {
        let one = desc("one", 1, &[], &[A]);
        let two = desc("two", 2, &[], &[A]);
        assert!(validate_chain(&[&one, &two]).is_err());
    }

    #[test]
    fn binary_inputs_are_rejected() {
        let one = desc("one", 1, &[], &[DOC]);
        let two = desc("two", 2, &[DOC], &[A]);
        assert!(validate_chain(&[&one, &two]).is_err());
    }

    #[test]
    fn stage_inputs_reject_undeclared_reads() {
        let mut inputs = StageInputs::default();
        inputs.insert(&A, serde_json::json!({}));
        assert!(inputs.get(&A).is_ok());
        assert!(inputs.get(&B).is_err());
    }
}
