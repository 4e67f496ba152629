//! CLI argument parsing for the report pipeline.
//!
//! One invocation runs the chain from `--start-stage` to the end. A fresh run
//! needs `--input`; a resumed run needs `--run-id` and inherits the inputs
//! recorded in its manifest.
use clap::Parser;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "dreport",
    version,
    about = "Generate a management report from an annual securities report",
    after_help = "Stages:\n  1 extraction  2 scoring  3 selection  4 roadmap\n  5 summary     6 assembly 7 rendering\n\nExamples:\n  dreport -i data/input/report_1234.pdf --csv data/input/financials.csv -y\n  dreport --run-id 1234_20260101_090000 --start-stage 3 -y"
)]
pub struct Args {
    /// Disclosure document (PDF or plain text)
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Company code; derived from the input file name when omitted
    #[arg(short = 'c', long, value_name = "CODE")]
    pub code: Option<String>,

    /// Financial statements table (CSV)
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Initiative catalog (JSON)
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Industry outlook (Markdown)
    #[arg(long, value_name = "FILE")]
    pub outlook: Option<PathBuf>,

    /// Model (deployment) id for analysis calls
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Leave few-shot exemplars out of prompts
    #[arg(long)]
    pub no_fewshot: bool,

    /// JSON object of prompt key to exemplar text, merged over the built-ins
    #[arg(long, value_name = "FILE")]
    pub fewshot_file: Option<PathBuf>,

    /// Run every stage without asking for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// First stage to run (1-7)
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub start_stage: usize,

    /// Existing run to resume; required when --start-stage is above 1
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Root directory holding runs/
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Local command that reads a prompt on stdin and prints the response
    #[arg(long, value_name = "CMD")]
    pub lm_command: Option<String>,

    /// Seconds to wait for each LM call
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Log at debug level
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
