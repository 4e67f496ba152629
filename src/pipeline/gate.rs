//! Operator confirmation between stages.
use super::StageDescriptor;
use crate::error::{PipelineError, PipelineResult};
use std::io::{self, BufRead, Write};

/// Decides whether the next stage may run.
pub trait ConfirmGate {
    fn confirm(&mut self, stage: &StageDescriptor, total: usize) -> PipelineResult<bool>;
}

/// Approves every stage (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl ConfirmGate for AutoApprove {
    fn confirm(&mut self, _stage: &StageDescriptor, _total: usize) -> PipelineResult<bool> {
        Ok(true)
    }
}

/// Asks `[Y/n]` on a line-oriented terminal. An empty answer approves; end of
/// input declines.
pub struct TerminalGate<R, W> {
    input: R,
    output: W,
}

impl TerminalGate<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> ConfirmGate for TerminalGate<R, W> {
    fn confirm(&mut self, stage: &StageDescriptor, total: usize) -> PipelineResult<bool> {
        write!(
            self.output,
            "Run stage {}/{} ({})? [Y/n] ",
            stage.ordinal, total, stage.name
        )
        .and_then(|()| self.output.flush())
        .map_err(|err| PipelineError::io("write confirmation prompt", err))?;
        let mut answer = String::new();
        let read = self
            .input
            .read_line(&mut answer)
            .map_err(|err| PipelineError::io("read confirmation answer", err))?;
        if read == 0 {
            return Ok(false);
        }
        Ok(is_approval(&answer))
    }
}

fn is_approval(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
