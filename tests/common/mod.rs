//! Shared fixtures for integration tests.
#![allow(dead_code)]

use disclosure_report::error::{PipelineError, PipelineResult};
use disclosure_report::llm::{CompletionRequest, LlmTransport};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TAGGING_REPLY: &str = r#"{"pages": [
    {"page": 1, "sections": [
        {"tag": "business_sales", "text": "Orders come mostly from prefectural public works."},
        {"tag": "human_capital", "text": "Site staff are ageing and hiring is slow."}]},
    {"page": 2, "sections": [
        {"tag": "management_strategy", "text": "The plan targets repair and renewal work."}]}]}"#;
pub const SCORING_REPLY: &str = r#"{"items": [{"score": 2, "rationale": "thin disclosure"}],
    "summary": "Disclosure is brief."}"#;
pub const LOCAL_FEATURE_REPLY: &str = r#"{"summary": "A regional contractor with steady public demand."}"#;
pub const OVERALL_FEATURE_REPLY: &str = r#"{"summary": "Its strength is a dense public-works network. Labour shortage is a key issue."}"#;
pub const SELECTION_REPLY: &str = r#"{"selected_solutions": [
    {"name": "Shared site DX platform", "priority": 1, "issue_fit": "Raises site productivity.",
     "regional_fit": "Labour is scarce locally.", "expected_impact": "Shorter schedules",
     "addressed_weaknesses": ["productivity_operations"]}]}"#;
pub const IMPACT_REPLY: &str = r#"{"assumptions": ["orders flat"],
    "quantitative_impact": {"revenue": "+1-2%", "profit_margin": "5.0% -> 5.5-6.0%"},
    "qualitative_impact": {"effects": ["steadier schedules"], "narrative": "Sites run leaner."}}"#;
pub const ROADMAP_REPLY: &str = r#"{"short_term": {"actions": ["Pilot on two sites"], "ideal_state": "Tools in daily use"},
    "mid_term": {"actions": ["Roll out"], "ideal_state": "All sites connected"},
    "long_term": {"actions": ["Share with partners"], "ideal_state": "Regional platform"}}"#;
pub const RISKS_REPLY: &str = r#"{"risks": [
    {"risk_type": "execution", "risk": "Low adoption", "mitigation": "Train site leads", "trigger_or_signal": "Usage below 50%"}]}"#;
pub const SUMMARY_REPLY: &str = r#"{"content": "A regional contractor that can lift margins by sharing site tools."}"#;

/// Canned reply for every task the pipeline sends.
pub fn full_replies() -> Vec<(&'static str, &'static str)> {
    vec![
        ("page-tagging", TAGGING_REPLY),
        ("tag-scoring", SCORING_REPLY),
        ("local-feature", LOCAL_FEATURE_REPLY),
        ("overall-feature", OVERALL_FEATURE_REPLY),
        ("initiative-selection", SELECTION_REPLY),
        ("impact-estimate", IMPACT_REPLY),
        ("execution-roadmap", ROADMAP_REPLY),
        ("risk-review", RISKS_REPLY),
        ("executive-summary", SUMMARY_REPLY),
    ]
}

fn task_of(prompt: &str) -> String {
    prompt
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("# Task: "))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// LM backend answering from a fixed table keyed on the prompt's task line.
#[derive(Clone, Default)]
pub struct MockTransport {
    replies: BTreeMap<String, String>,
    calls: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(task, body)| (task.to_string(), body.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn task_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.tasks)
    }
}

impl LlmTransport for MockTransport {
    fn complete(&self, request: &CompletionRequest<'_>) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let task = task_of(request.prompt);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task.clone());
        }
        self.replies
            .get(&task)
            .cloned()
            .ok_or_else(|| PipelineError::service(format!("no mock reply for `{task}`")))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Input files for company 1234 in a scratch directory.
pub struct Fixture {
    pub dir: TempDir,
    pub document: PathBuf,
    pub csv: PathBuf,
    pub catalog: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let document = dir.path().join("report_1234.txt");
        fs::write(
            &document,
            "Orders come mostly from prefectural public works. Site staff are ageing.\u{000C}\
             The plan targets repair and renewal work.",
        )
        .expect("write document");
        let csv = dir.path().join("financials.csv");
        fs::write(
            &csv,
            "code,YEAR,location,industry,revenue,operating_income,net_income,total_assets,net_assets\n\
             1234,2023,Ibaraki,Construction,9500,420,260,8000,3100\n\
             1234,2024,Ibaraki,Construction,10000,500,300,8200,3300\n",
        )
        .expect("write csv");
        let catalog = dir.path().join("solutions.json");
        fs::write(
            &catalog,
            r#"{
  "Shared site DX platform": {
    "overview": "Pool drones and site cameras across firms.",
    "target_categories": [{"no": 3, "name": "Productivity"}, {"no": 4, "name": "Human capital"}],
    "regional_relevance": "Fits rural contractors.",
    "case_examples": [{"company": "Example Kensetsu", "securities_code": 1801, "description": "Pooled drones."}]
  },
  "Order book review": {
    "overview": "Rebalance public and private orders.",
    "target_categories": [{"no": 2, "name": "Business"}]
  }
}"#,
        )
        .expect("write catalog");
        Self {
            dir,
            document,
            csv,
            catalog,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Shell script that plays the LM for `--lm-command`.
    pub fn write_lm_script(&self) -> PathBuf {
        let mut script = String::from("#!/bin/sh\nIFS= read -r first\ncat >/dev/null\ncase \"$first\" in\n");
        for (task, body) in full_replies() {
            script.push_str(&format!("  \"# Task: {task}\")\n    cat <<'JSON'\n{body}\nJSON\n    ;;\n"));
        }
        script.push_str("  *)\n    echo \"unknown task: $first\" >&2\n    exit 1\n    ;;\nesac\n");
        let path = self.dir.path().join("fake_lm.sh");
        fs::write(&path, script).expect("write lm script");
        path
    }
}

pub fn read_bytes(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}
