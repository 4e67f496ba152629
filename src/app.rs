//! Wire the CLI to the registry, the LM backends and the stage runner.
use crate::cli::Args;
use crate::config::{PipelineConfig, ServiceConfig, DEFAULT_DATA_DIR, DEFAULT_MODEL_ID};
use crate::llm::{
    CommandTransport, HttpTransport, LlmClient, LlmTransport, RetryPolicy, UnconfiguredTransport,
};
use crate::pipeline::{self, AutoApprove, ConfirmGate, RunOutcome, TerminalGate};
use crate::run::{ArtifactSpec, RunHandle, RunInputs, RunRegistry};
use crate::stages::prompts::Exemplars;
use crate::stages::{default_pipeline, SourceSet, StageContext, REPORT_DOCUMENT};
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::process::ExitCode;
use std::sync::LazyLock;
use std::time::Duration;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DECLINED: u8 = 3;

/// Catalog picked up under the data directory when `--catalog` is absent.
const DEFAULT_CATALOG: &str = "input/solutions.json";

static COMPANY_CODE_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("valid company code regex"));

/// Company code from a document file name: the first digit run, or the
/// sanitized stem when there is none.
pub fn derive_company_code(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    if let Some(found) = COMPANY_CODE_DIGITS.captures(&stem).and_then(|cap| cap.get(1)) {
        return Some(found.as_str().to_string());
    }
    let sanitized: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('_').to_string();
    (!sanitized.is_empty()).then_some(sanitized)
}

fn explicit_inputs(args: &Args) -> RunInputs {
    RunInputs {
        document: args.input.clone(),
        csv: args.csv.clone(),
        catalog: args.catalog.clone(),
        outlook: args.outlook.clone(),
        model_id: args.model.clone(),
        fewshot: args.no_fewshot.then_some(false),
    }
}

fn service_config(args: &Args) -> Result<ServiceConfig> {
    let mut service = ServiceConfig::from_env().context("read LM service settings")?;
    if let Some(command) = &args.lm_command {
        service.lm_command = Some(command.clone());
    }
    if let Some(secs) = args.timeout {
        service.timeout = Duration::from_secs(secs);
    }
    service.validate().context("validate LM service settings")?;
    Ok(service)
}

fn analysis_transport(service: &ServiceConfig) -> Result<Box<dyn LlmTransport>> {
    if let Some(command) = &service.lm_command {
        return Ok(Box::new(
            CommandTransport::new(command, service.timeout).context("configure --lm-command")?,
        ));
    }
    match HttpTransport::from_config(service) {
        Some(http) => Ok(Box::new(http)),
        None => {
            tracing::warn!("no LM backend configured; stages that call the LM will fail");
            Ok(Box::new(UnconfiguredTransport))
        }
    }
}

fn tagging_transport(service: &ServiceConfig) -> Option<Box<dyn LlmTransport>> {
    if service.lm_command.is_some() {
        return None;
    }
    HttpTransport::tagging_from_config(service).map(|http| Box::new(http) as Box<dyn LlmTransport>)
}

/// The run to work on, before a fresh one is created.
struct Target {
    existing: Option<RunHandle>,
    company_code: String,
    inputs: RunInputs,
}

fn resolve_target(args: &Args, registry: &RunRegistry, prior: &[ArtifactSpec]) -> Result<Target> {
    let explicit = explicit_inputs(args);
    match &args.run_id {
        Some(run_id) => {
            let handle = registry.resolve_run(run_id, prior)?;
            let mut manifest = handle.load_manifest()?;
            tracing::info!(
                run_id = handle.id(),
                last_completed = ?manifest.last_completed(),
                start_stage = args.start_stage,
                "resuming run"
            );
            let inputs = explicit.merged_over(&manifest.inputs);
            if inputs != manifest.inputs {
                manifest.inputs = inputs.clone();
                handle.write_manifest(&manifest)?;
            }
            let company_code = args.code.clone().unwrap_or(manifest.company_code);
            Ok(Target {
                existing: Some(handle),
                company_code,
                inputs,
            })
        }
        None => {
            if args.start_stage > 1 {
                bail!("--run-id is required when --start-stage is above 1");
            }
            let Some(document) = &explicit.document else {
                bail!("--input is required to start a new run");
            };
            let company_code = match &args.code {
                Some(code) => code.clone(),
                None => derive_company_code(document).ok_or_else(|| {
                    anyhow!(
                        "cannot derive a company code from {}; pass --code",
                        document.display()
                    )
                })?,
            };
            Ok(Target {
                existing: None,
                company_code,
                inputs: explicit,
            })
        }
    }
}

/// Run the pipeline for one invocation and map the outcome to an exit code.
pub fn execute(args: &Args) -> Result<ExitCode> {
    let pipeline = default_pipeline()?;
    pipeline.check_start(args.start_stage)?;
    let service = service_config(args)?;

    let data_dir = args.data_dir.clone().unwrap_or_else(|| DEFAULT_DATA_DIR.into());
    let registry = RunRegistry::new(data_dir.clone());
    let mut target = resolve_target(args, &registry, &pipeline.prior_inputs(args.start_stage))?;
    if target.inputs.catalog.is_none() {
        let default_catalog = data_dir.join(DEFAULT_CATALOG);
        if default_catalog.is_file() {
            tracing::debug!(path = %default_catalog.display(), "using default catalog");
            target.inputs.catalog = Some(default_catalog);
        }
    }

    let config = PipelineConfig {
        data_dir,
        model_id: target
            .inputs
            .model_id
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
        fewshot: target.inputs.fewshot.unwrap_or(true),
        fewshot_file: args.fewshot_file.clone(),
        ..PipelineConfig::default()
    };
    config.validate()?;
    let exemplars = Exemplars::load(&config)?;
    let llm = LlmClient::from_service(analysis_transport(&service)?, &service);
    let tagging_llm = tagging_transport(&service).map(|transport| LlmClient::from_service(transport, &service));

    let handle = match target.existing {
        Some(handle) => handle,
        None => registry.start_run(&target.company_code, &target.inputs)?,
    };
    println!("run id: {}", handle.id());

    let sources = SourceSet {
        company_code: target.company_code.clone(),
        document: target.inputs.document.clone(),
        csv: target.inputs.csv.clone(),
        catalog: target.inputs.catalog.clone(),
        outlook: target.inputs.outlook.clone(),
    };
    let mut ctx = StageContext::new(&config, &sources, &llm)
        .with_retry(RetryPolicy::from_service(&service))
        .with_lm_log(handle.paths().lm_log_path())
        .with_exemplars(exemplars);
    if let Some(tagging) = &tagging_llm {
        ctx = ctx.with_tagging_llm(tagging);
    }
    tracing::info!(
        run_id = handle.id(),
        backend = %llm.describe(),
        model = %config.model_id,
        fewshot = config.fewshot,
        start_stage = args.start_stage,
        "pipeline configured"
    );

    let mut gate: Box<dyn ConfirmGate> = if args.yes {
        Box::new(AutoApprove)
    } else {
        Box::new(TerminalGate::stdio())
    };
    match pipeline::run(&pipeline, &ctx, &handle, args.start_stage, gate.as_mut()) {
        Ok(RunOutcome::Completed { stages_run }) => {
            println!(
                "completed {stages_run} stage(s); report: {}",
                handle.paths().artifact_path(&REPORT_DOCUMENT).display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Declined { stage, ordinal }) => {
            eprintln!(
                "stopped before stage {ordinal} ({stage})\n  resume with: dreport --run-id {} --start-stage {ordinal}",
                handle.id()
            );
            Ok(ExitCode::from(EXIT_DECLINED))
        }
        Err(failure) => {
            if let Some(raw) = failure.source.raw_response() {
                tracing::debug!(raw_bytes = raw.len(), "raw LM response retained under failures/");
            }
            eprintln!("error: {failure}");
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}
