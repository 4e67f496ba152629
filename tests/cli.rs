mod common;

use common::Fixture;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const SERVICE_VARS: &[&str] = &[
    "LLM_ENDPOINT",
    "AZURE_OPENAI_ENDPOINT",
    "LLM_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "TAGGING_ENDPOINT",
    "TAGGING_TOKEN",
    "HF_TOKEN",
    "DREPORT_LM_COMMAND",
    "DREPORT_TIMEOUT_SECS",
];

fn dreport(cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dreport"));
    cmd.current_dir(cwd);
    for var in SERVICE_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn run_with_stdin(mut cmd: Command, stdin: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn dreport");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait dreport")
}

fn run_id_from(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .find_map(|line| line.strip_prefix("run id: "))
        .map(str::to_string)
        .expect("run id printed")
}

fn fresh_run(fixture: &Fixture) -> Command {
    let script = fixture.write_lm_script();
    let mut cmd = dreport(fixture.dir.path());
    cmd.arg("-i")
        .arg(&fixture.document)
        .arg("--csv")
        .arg(&fixture.csv)
        .arg("--catalog")
        .arg(&fixture.catalog)
        .arg("--data-dir")
        .arg(fixture.data_dir())
        .arg("--lm-command")
        .arg(format!("sh {}", script.display()));
    cmd
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let fixture = Fixture::new();
    let output = dreport(fixture.dir.path()).arg("--no-such-flag").output().expect("run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn late_start_without_run_id_fails() {
    let fixture = Fixture::new();
    let output = dreport(fixture.dir.path())
        .args(["--start-stage", "3", "-y", "--data-dir"])
        .arg(fixture.data_dir())
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--run-id"));
}

#[test]
fn start_stage_outside_chain_fails() {
    let fixture = Fixture::new();
    let output = dreport(fixture.dir.path())
        .args(["--start-stage", "8", "-y"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unknown_run_id_fails() {
    let fixture = Fixture::new();
    let output = dreport(fixture.dir.path())
        .args(["--run-id", "1234_20260101_000000", "--start-stage", "2", "-y", "--data-dir"])
        .arg(fixture.data_dir())
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("1234_20260101_000000"));
}

#[test]
fn full_run_with_local_lm_command() {
    let fixture = Fixture::new();
    let mut cmd = fresh_run(&fixture);
    let output = cmd.arg("-y").output().expect("run");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let run_id = run_id_from(&output.stdout);
    assert!(run_id.starts_with("1234_"));
    let run_dir = fixture.data_dir().join("runs").join(&run_id);
    assert!(run_dir.join("run.json").is_file());
    let docx = run_dir.join("artifacts").join(format!("report_{run_id}.docx"));
    assert!(docx.is_file(), "missing {}", docx.display());
}

#[test]
fn declining_at_the_prompt_exits_with_resume_hint() {
    let fixture = Fixture::new();
    // approve extraction and scoring, then decline selection
    let output = run_with_stdin(fresh_run(&fixture), "y\n\nn\n");
    assert_eq!(output.status.code(), Some(3));
    let run_id = run_id_from(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("--run-id {run_id} --start-stage 3")), "{stderr}");

    let mut resume = dreport(fixture.dir.path());
    let script = fixture.write_lm_script();
    let output = resume
        .args(["--run-id", run_id.as_str(), "--start-stage", "3", "-y", "--data-dir"])
        .arg(fixture.data_dir())
        .arg("--lm-command")
        .arg(format!("sh {}", script.display()))
        .output()
        .expect("resume");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(run_id_from(&output.stdout), run_id);
}
