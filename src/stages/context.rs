//! Everything a stage may use besides its input artifacts.
use super::prompts::Exemplars;
use super::sources::SourceSet;
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::llm::log::{append_lm_log, LmLogBuilder};
use crate::llm::{LlmClient, RetryPolicy, Shape};
use serde_json::Value;
use std::path::PathBuf;

pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub sources: &'a SourceSet,
    llm: &'a LlmClient,
    tagging_llm: Option<&'a LlmClient>,
    retry: RetryPolicy,
    lm_log_path: Option<PathBuf>,
    exemplars: Exemplars,
}

impl<'a> StageContext<'a> {
    pub fn new(config: &'a PipelineConfig, sources: &'a SourceSet, llm: &'a LlmClient) -> Self {
        Self {
            config,
            sources,
            llm,
            tagging_llm: None,
            retry: RetryPolicy::none(),
            lm_log_path: None,
            exemplars: Exemplars::builtin(config.fewshot),
        }
    }

    /// Route page tagging to a dedicated backend.
    pub fn with_tagging_llm(mut self, llm: &'a LlmClient) -> Self {
        self.tagging_llm = Some(llm);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lm_log(mut self, path: PathBuf) -> Self {
        self.lm_log_path = Some(path);
        self
    }

    pub fn with_exemplars(mut self, exemplars: Exemplars) -> Self {
        self.exemplars = exemplars;
        self
    }

    pub fn exemplars(&self) -> &Exemplars {
        &self.exemplars
    }

    /// Call the analysis model and return JSON conforming to `shape`.
    pub fn ask(&self, stage: &str, label: &str, prompt: &str, shape: &Shape) -> PipelineResult<Value> {
        self.ask_with(self.llm, stage, label, prompt, shape)
    }

    /// Call the tagging model, falling back to the analysis model.
    pub fn ask_tagging(
        &self,
        stage: &str,
        label: &str,
        prompt: &str,
        shape: &Shape,
    ) -> PipelineResult<Value> {
        self.ask_with(self.tagging_llm.unwrap_or(self.llm), stage, label, prompt, shape)
    }

    fn ask_with(
        &self,
        client: &LlmClient,
        stage: &str,
        label: &str,
        prompt: &str,
        shape: &Shape,
    ) -> PipelineResult<Value> {
        let model_id = self.config.model_id.as_str();
        let builder = LmLogBuilder::new(stage, label, model_id, client.describe()).with_prompt(prompt);
        tracing::debug!(stage, label, prompt_bytes = prompt.len(), "lm call");
        let (result, attempts) = self
            .retry
            .run(|_| client.call_detailed(prompt, model_id, shape));
        let entry = match &result {
            Ok(reply) => builder.success(attempts, reply.raw_response.len(), reply.repaired),
            Err(err) => builder.failed(attempts, err),
        };
        if let Some(path) = &self.lm_log_path {
            if let Err(err) = append_lm_log(path, &entry) {
                tracing::warn!(error = %err, "could not append lm log entry");
            }
        }
        result.map(|reply| reply.value)
    }
}
