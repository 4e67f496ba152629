//! Error taxonomy shared by the registry, the LM wrapper, and every stage.
//!
//! Each variant maps to exactly one operator action: rerun an upstream stage,
//! inspect a retained LM response, check service credentials, or fix a run id.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while building, resuming, or executing a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An upstream stage never ran or its output was deleted.
    #[error("missing artifact `{artifact}` (expected at {})", path.display())]
    MissingArtifact { artifact: String, path: PathBuf },

    /// LM output could not be parsed or repaired into the expected shape.
    #[error("malformed LM response: {reason}")]
    MalformedResponse { reason: String, raw: String },

    /// Transport, authentication, rate-limit, or timeout failure.
    #[error("LM service error: {message}")]
    Service { message: String },

    /// Resume requested against a run that cannot be resumed.
    #[error("run `{run_id}` not found: {reason}")]
    RunNotFound { run_id: String, reason: String },

    /// A source document, financial table, or catalog could not be used.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Stage descriptors violate the linear chain ordering.
    #[error("invalid stage chain: {0}")]
    InvalidChain(String),

    /// The final document could not be rendered.
    #[error("render failed: {0}")]
    Render(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Raw LM text retained for diagnosis, when the error carries one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Whether a caller-side retry may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

/// A stage-attributed failure that aborted a run.
///
/// The message carries everything an operator needs to resume: the run id,
/// the failing stage, and the matching `--start-stage` invocation.
#[derive(Debug, Error)]
#[error(
    "stage {ordinal} ({stage}) failed for run {run_id}: {source}\n  resume with: dreport --run-id {run_id} --start-stage {ordinal}"
)]
pub struct StageFailure {
    pub run_id: String,
    pub stage: &'static str,
    pub ordinal: usize,
    #[source]
    pub source: PipelineError,
}
