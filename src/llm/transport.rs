//! Backends that turn a prompt into raw response text.
//!
//! Two backends exist: an HTTP chat-completions client (Azure OpenAI style, or
//! any OpenAI-compatible endpoint behind a bearer token) and a local command
//! that reads the prompt on stdin. Both enforce the configured bounded wait
//! and report every failure as a service error.
use crate::config::{Secret, ServiceConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::util::truncate_string;
use serde::Deserialize;
use serde_json::json;
use std::io::{self, ErrorKind, Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const ERROR_BODY_LIMIT: usize = 500;
const COMMAND_POLL: Duration = Duration::from_millis(25);

/// One completion request.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model_id: &'a str,
    pub prompt: &'a str,
    pub max_completion_tokens: u32,
}

/// Prompt in, raw text out.
pub trait LlmTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> PipelineResult<String>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Placeholder used when no backend is configured; fails on first use so
/// stages that never call the LM still run.
#[derive(Debug, Default)]
pub struct UnconfiguredTransport;

impl LlmTransport for UnconfiguredTransport {
    fn complete(&self, _request: &CompletionRequest<'_>) -> PipelineResult<String> {
        Err(PipelineError::service(
            "no LM backend configured: set LLM_ENDPOINT and LLM_API_KEY, or pass --lm-command",
        ))
    }

    fn describe(&self) -> String {
        "unconfigured".to_string()
    }
}

#[derive(Debug, Clone)]
enum Route {
    Azure { endpoint: String, api_version: String },
    Direct { url: String },
}

#[derive(Debug, Clone)]
enum Auth {
    ApiKey(Secret),
    Bearer(Secret),
}

/// Chat-completions over HTTP with JSON response format.
pub struct HttpTransport {
    agent: ureq::Agent,
    route: Route,
    auth: Auth,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpTransport {
    /// Azure OpenAI deployment routing with an `api-key` header.
    pub fn azure(endpoint: &str, api_key: Secret, api_version: &str, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            route: Route::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_version: api_version.to_string(),
            },
            auth: Auth::ApiKey(api_key),
        }
    }

    /// An OpenAI-compatible endpoint with bearer authentication.
    pub fn openai_compatible(endpoint: &str, token: Secret, timeout: Duration) -> Self {
        let base = endpoint.trim_end_matches('/');
        let url = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/v1/chat/completions")
        };
        Self {
            agent: build_agent(timeout),
            route: Route::Direct { url },
            auth: Auth::Bearer(token),
        }
    }

    /// Main analysis backend, when the endpoint and key are both configured.
    pub fn from_config(config: &ServiceConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?;
        let key = config.api_key.clone()?;
        Some(Self::azure(endpoint, key, &config.api_version, config.timeout))
    }

    /// Dedicated tagging backend, when configured.
    pub fn tagging_from_config(config: &ServiceConfig) -> Option<Self> {
        let endpoint = config.tagging_endpoint.as_deref()?;
        let token = config.tagging_token.clone()?;
        Some(Self::openai_compatible(endpoint, token, config.timeout))
    }

    fn url(&self, model_id: &str) -> String {
        match &self.route {
            Route::Azure {
                endpoint,
                api_version,
            } => format!(
                "{endpoint}/openai/deployments/{model_id}/chat/completions?api-version={api_version}"
            ),
            Route::Direct { url } => url.clone(),
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

impl LlmTransport for HttpTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> PipelineResult<String> {
        let body = json!({
            "model": request.model_id,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_completion_tokens": request.max_completion_tokens,
            "response_format": {"type": "json_object"},
        });
        let builder = self.agent.post(&self.url(request.model_id));
        let builder = match &self.auth {
            Auth::ApiKey(key) => builder.header("api-key", key.expose()),
            Auth::Bearer(token) => {
                builder.header("Authorization", &format!("Bearer {}", token.expose()))
            }
        };

        let start = Instant::now();
        let mut response = builder.send_json(&body).map_err(|err| match err {
            ureq::Error::Timeout(_) => PipelineError::service(format!(
                "request timed out after {} ms",
                start.elapsed().as_millis()
            )),
            other => PipelineError::service(format!("request failed: {other}")),
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.body_mut().read_to_string().unwrap_or_default();
            return Err(PipelineError::service(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate_string(text.trim(), ERROR_BODY_LIMIT)
            )));
        }
        let completion: ChatCompletion = response
            .body_mut()
            .read_json()
            .map_err(|err| PipelineError::service(format!("unreadable completion envelope: {err}")))?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::service("completion carried no choices"))?;
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(model_id = request.model_id, "lm response hit the token limit");
        }
        let text = choice.message.content.unwrap_or_default();

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt.len(),
            response_bytes = text.len(),
            "lm invoke complete"
        );
        Ok(text)
    }

    fn describe(&self) -> String {
        match &self.route {
            Route::Azure { endpoint, .. } => format!("azure:{endpoint}"),
            Route::Direct { url } => format!("http:{url}"),
        }
    }
}

/// Runs a local command with the prompt on stdin and reads stdout.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandTransport {
    pub fn new(command: &str, timeout: Duration) -> PipelineResult<Self> {
        let argv = shell_words::split(command).map_err(|err| {
            PipelineError::InvalidInput(format!("parse LM command {command:?}: {err}"))
        })?;
        let Some(program) = argv.first() else {
            return Err(PipelineError::InvalidInput("LM command is empty".to_string()));
        };
        which::which(program).map_err(|err| {
            PipelineError::InvalidInput(format!("LM command {program:?} not found: {err}"))
        })?;
        Ok(Self { argv, timeout })
    }
}

impl LlmTransport for CommandTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> PipelineResult<String> {
        let start = Instant::now();
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .env("DREPORT_MODEL_ID", request.model_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| PipelineError::service(format!("spawn LM command {}: {err}", self.argv[0])))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let feeder = feed(child.stdin.take(), request.prompt.as_bytes().to_vec());

        let status = wait_with_deadline(&mut child, start + self.timeout)?;
        match feeder.join() {
            Ok(Ok(())) => {}
            // the command may exit without reading all of its input
            Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => {
                return Err(PipelineError::service(format!("write prompt to LM stdin: {err}")))
            }
            Err(_) => return Err(PipelineError::service("LM stdin writer panicked")),
        }
        let stdout = stdout
            .join()
            .map_err(|_| PipelineError::service("LM stdout reader panicked"))?;
        let stderr = stderr
            .join()
            .map_err(|_| PipelineError::service("LM stderr reader panicked"))?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.prompt.len(),
            response_bytes = stdout.len(),
            "lm invoke complete"
        );

        if !status.success() {
            return Err(PipelineError::service(format!(
                "LM command failed with status {status}: {}",
                truncate_string(String::from_utf8_lossy(&stderr).trim(), ERROR_BODY_LIMIT)
            )));
        }
        String::from_utf8(stdout)
            .map_err(|err| PipelineError::service(format!("decode LM stdout as UTF-8: {err}")))
    }

    fn describe(&self) -> String {
        format!("command:{}", self.argv[0])
    }
}

/// Write `prompt` on a separate thread; dropping the handle closes stdin.
fn feed<W: Write + Send + 'static>(pipe: Option<W>, prompt: Vec<u8>) -> thread::JoinHandle<io::Result<()>> {
    thread::spawn(move || match pipe {
        Some(mut pipe) => pipe.write_all(&prompt),
        None => Ok(()),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> PipelineResult<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PipelineError::service("LM command timed out"));
            }
            Ok(None) => thread::sleep(COMMAND_POLL),
            Err(err) => return Err(PipelineError::service(format!("wait for LM command: {err}"))),
        }
    }
}
