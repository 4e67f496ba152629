//! The LM call wrapper: prompt in, validated JSON out.
//!
//! Interpretation is a fixed sequence: strict parse, then [`repair`] and a
//! second parse, then [`check`] against the expected shape. Any failure past
//! the transport is a `MalformedResponse` carrying the raw text. Service
//! failures pass through untouched; retrying them is the caller's decision
//! (see [`RetryPolicy`]).
use super::repair::repair;
use super::shape::{check, Shape};
use super::transport::{CompletionRequest, LlmTransport};
use crate::config::{ServiceConfig, DEFAULT_MAX_COMPLETION_TOKENS};
use crate::error::{PipelineError, PipelineResult};
use serde_json::Value;
use std::time::Duration;

/// Outcome of one interpreted call, with metadata for logging.
#[derive(Debug)]
pub struct LlmReply {
    pub value: Value,
    pub raw_response: String,
    /// Whether the strict parse failed and repair was needed.
    pub repaired: bool,
}

pub struct LlmClient {
    transport: Box<dyn LlmTransport>,
    max_completion_tokens: u32,
}

impl LlmClient {
    pub fn new(transport: Box<dyn LlmTransport>) -> Self {
        Self {
            transport,
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
        }
    }

    pub fn from_service(transport: Box<dyn LlmTransport>, config: &ServiceConfig) -> Self {
        Self {
            transport,
            max_completion_tokens: config.max_completion_tokens,
        }
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Send `prompt` and return JSON conforming to `expected_shape`.
    pub fn call(&self, prompt: &str, model_id: &str, expected_shape: &Shape) -> PipelineResult<Value> {
        self.call_detailed(prompt, model_id, expected_shape)
            .map(|reply| reply.value)
    }

    pub fn call_detailed(
        &self,
        prompt: &str,
        model_id: &str,
        expected_shape: &Shape,
    ) -> PipelineResult<LlmReply> {
        let raw = self.transport.complete(&CompletionRequest {
            model_id,
            prompt,
            max_completion_tokens: self.max_completion_tokens,
        })?;
        let (value, repaired) = interpret(&raw, expected_shape)?;
        Ok(LlmReply {
            value,
            raw_response: raw,
            repaired,
        })
    }
}

/// Parse (repairing if needed) and validate raw response text.
pub fn interpret(raw: &str, expected_shape: &Shape) -> PipelineResult<(Value, bool)> {
    let (value, repaired) = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => (value, false),
        Err(strict_err) => {
            let fixed = repair(raw);
            match serde_json::from_str::<Value>(&fixed) {
                Ok(value) => {
                    tracing::debug!(error = %strict_err, "lm response needed repair");
                    (value, true)
                }
                Err(err) => {
                    return Err(PipelineError::MalformedResponse {
                        reason: format!("not parseable as JSON after repair: {err}"),
                        raw: raw.to_string(),
                    })
                }
            }
        }
    };
    if let Err(violations) = check(&value, expected_shape) {
        let listed: Vec<String> = violations.iter().map(ToString::to_string).collect();
        return Err(PipelineError::MalformedResponse {
            reason: format!("unexpected shape: {}", listed.join("; ")),
            raw: raw.to_string(),
        });
    }
    Ok((value, repaired))
}

/// Caller-side retry budget: service errors only, fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub service_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            service_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            service_retries: config.service_retries,
            backoff: config.retry_backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// budget is spent. Returns the result and the number of attempts made.
    pub fn run<T, F>(&self, mut op: F) -> (PipelineResult<T>, u32)
    where
        F: FnMut(u32) -> PipelineResult<T>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Err(err) if err.is_transient() && attempt <= self.service_retries => {
                    tracing::warn!(attempt, error = %err, "lm service error, retrying");
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                result => return (result, attempt),
            }
        }
    }
}
