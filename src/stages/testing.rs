//! Scripted LM backend for stage tests.
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{CompletionRequest, LlmTransport};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Replies keyed by the `# Task: <name>` line that opens every prompt.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: BTreeMap<String, Vec<String>>,
    pub prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `task`. The last queued reply repeats once the
    /// queue is down to one.
    pub fn reply(mut self, task: &str, body: &str) -> Self {
        self.replies
            .entry(task.to_string())
            .or_default()
            .push(body.to_string());
        self
    }

    pub fn prompt_log(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.prompts)
    }
}

pub fn task_of(prompt: &str) -> &str {
    prompt
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("# Task: "))
        .unwrap_or_default()
        .trim()
}

impl LlmTransport for ScriptedTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> PipelineResult<String> {
        self.prompts.borrow_mut().push(request.prompt.to_string());
        let task = task_of(request.prompt);
        let seen = self
            .prompts
            .borrow()
            .iter()
            .filter(|prompt| task_of(prompt) == task)
            .count();
        let queue = self
            .replies
            .get(task)
            .ok_or_else(|| PipelineError::service(format!("no scripted reply for `{task}`")))?;
        let idx = (seen - 1).min(queue.len() - 1);
        Ok(queue[idx].clone())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Prompts sent for `task`, in order.
pub fn prompts_for(log: &Rc<RefCell<Vec<String>>>, task: &str) -> Vec<String> {
    log.borrow()
        .iter()
        .filter(|prompt| task_of(prompt) == task)
        .cloned()
        .collect()
}
