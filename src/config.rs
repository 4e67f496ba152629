//! Explicit configuration objects for the pipeline and the LM service.
//!
//! The environment is read exactly once, at start-up, into [`ServiceConfig`].
//! Nothing downstream consults environment variables; credentials travel as
//! [`Secret`] values that never print.

use crate::error::{PipelineError, PipelineResult};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL_ID: &str = "gpt-5-mini";
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SERVICE_RETRIES: u32 = 1;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4000;
pub const DEFAULT_TAGGING_BATCH: usize = 5;
pub const DEFAULT_DATA_DIR: &str = "data";

const ENDPOINT_VARS: [&str; 2] = ["LLM_ENDPOINT", "AZURE_OPENAI_ENDPOINT"];
const API_KEY_VARS: [&str; 2] = ["LLM_API_KEY", "AZURE_OPENAI_API_KEY"];
const TAGGING_TOKEN_VARS: [&str; 2] = ["TAGGING_TOKEN", "HF_TOKEN"];
const API_VERSION_VAR: &str = "LLM_API_VERSION";
const TAGGING_ENDPOINT_VAR: &str = "TAGGING_ENDPOINT";
const LM_COMMAND_VAR: &str = "DREPORT_LM_COMMAND";
const TIMEOUT_VAR: &str = "DREPORT_TIMEOUT_SECS";

/// A credential that is redacted from `Debug` and `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw credential for an outgoing request header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Connection settings for the inference service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of an OpenAI-compatible (Azure style) chat completions service.
    pub endpoint: Option<String>,
    pub api_key: Option<Secret>,
    pub api_version: String,
    /// Optional dedicated endpoint for page tagging.
    pub tagging_endpoint: Option<String>,
    pub tagging_token: Option<Secret>,
    /// Local command that reads a prompt on stdin; replaces HTTP when set.
    pub lm_command: Option<String>,
    /// Bounded wait applied to every LM call.
    pub timeout: Duration,
    /// Extra attempts granted to service errors (never to malformed output).
    pub service_retries: u32,
    pub retry_backoff: Duration,
    pub max_completion_tokens: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            tagging_endpoint: None,
            tagging_token: None,
            lm_command: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            service_retries: DEFAULT_SERVICE_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
        }
    }
}

impl ServiceConfig {
    /// Snapshot the process environment.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(*key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };
        let mut config = Self {
            endpoint: first(&ENDPOINT_VARS),
            api_key: first(&API_KEY_VARS).map(Secret::new),
            tagging_endpoint: first(&[TAGGING_ENDPOINT_VAR]),
            tagging_token: first(&TAGGING_TOKEN_VARS).map(Secret::new),
            lm_command: first(&[LM_COMMAND_VAR]),
            ..Self::default()
        };
        if let Some(version) = first(&[API_VERSION_VAR]) {
            config.api_version = version;
        }
        if let Some(raw) = first(&[TIMEOUT_VAR]) {
            let secs: u64 = raw.parse().map_err(|_| {
                PipelineError::InvalidInput(format!("{TIMEOUT_VAR} must be whole seconds, got {raw:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every LM call fail.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.timeout.is_zero() {
            return Err(PipelineError::InvalidInput(
                "LM timeout must be greater than zero".to_string(),
            ));
        }
        if self.endpoint.is_some() != self.api_key.is_some() && self.lm_command.is_none() {
            return Err(PipelineError::InvalidInput(
                "LLM_ENDPOINT and LLM_API_KEY must be set together".to_string(),
            ));
        }
        if self.tagging_endpoint.is_some() && self.tagging_token.is_none() {
            return Err(PipelineError::InvalidInput(
                "TAGGING_ENDPOINT requires TAGGING_TOKEN".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether an HTTP backend is fully configured.
    pub fn has_http_backend(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

/// Per-invocation pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of `runs/` and the default `input/` directory.
    pub data_dir: PathBuf,
    pub model_id: String,
    /// Merge exemplar blocks into prompts.
    pub fewshot: bool,
    /// Extra exemplars that override the built-in ones by key.
    pub fewshot_file: Option<PathBuf>,
    pub tagging_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            model_id: DEFAULT_MODEL_ID.to_string(),
            fewshot: true,
            fewshot_file: None,
            tagging_batch: DEFAULT_TAGGING_BATCH,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.model_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("model id is empty".to_string()));
        }
        if self.tagging_batch == 0 {
            return Err(PipelineError::InvalidInput(
                "tagging batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
