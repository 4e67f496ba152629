//! Stage 5: the executive summary, one continuous passage.
use super::prompts::{render, EXECUTIVE_SUMMARY as SUMMARY_PROMPT};
use super::roadmap::RoadmapPlan;
use super::scoring::{LocalFeatures, ReportScores};
use super::selection::SolutionSelection;
use super::{StageContext, EXECUTIVE_SUMMARY, LOCAL_FEATURES, REPORT_SCORES, ROADMAP, SOLUTION_SELECTION};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{Field, Shape};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "summary",
    ordinal: 5,
    inputs: &[LOCAL_FEATURES, REPORT_SCORES, SOLUTION_SELECTION, ROADMAP],
    outputs: &[EXECUTIVE_SUMMARY],
};

pub const SECTION_ID: &str = "executive_summary";
pub const SECTION_TITLE: &str = "Executive Summary";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub id: String,
    pub title: String,
    pub content: String,
    pub char_count: usize,
}

impl ExecutiveSummary {
    pub fn new(content: impl Into<String>) -> Self {
        let content: String = content.into();
        Self {
            id: SECTION_ID.to_string(),
            title: SECTION_TITLE.to_string(),
            char_count: content.chars().count(),
            content,
        }
    }
}

fn read<T: DeserializeOwned>(inputs: &StageInputs, spec: &crate::run::ArtifactSpec) -> PipelineResult<T> {
    serde_json::from_value(inputs.get(spec)?.clone())
        .map_err(|err| PipelineError::json(format!("read {}", spec.name), err))
}

/// Digest of every upstream artifact the summary draws on.
pub fn analysis_text(
    features: &LocalFeatures,
    scores: &ReportScores,
    selection: &SolutionSelection,
    plan: &RoadmapPlan,
) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "[Company]\nCode {}, location {}, industry {}",
        features.company.code,
        features.company.location.as_deref().unwrap_or("unknown"),
        features.company.industry.as_deref().unwrap_or("unknown"),
    ));
    out.push(format!("[Regional characteristics]\n{}", features.overall));

    let score_lines: Vec<String> = scores
        .scores
        .iter()
        .map(|tag| match tag.avg_score {
            Some(avg) => format!("- {}: {avg:.2} ({})", tag.label, tag.summary),
            None => format!("- {}: not scored", tag.label),
        })
        .collect();
    out.push(format!("[Scores]\n{}", score_lines.join("\n")));

    if !selection.weak_tags.is_empty() {
        let weak: Vec<String> = selection
            .weak_tags
            .iter()
            .map(|avg| format!("{} ({:.2})", avg.label, avg.avg_score))
            .collect();
        out.push(format!("[Weakest areas]\n{}", weak.join(", ")));
    }

    if selection.selected_solutions.is_empty() {
        out.push("[Proposed initiatives]\nNone matched the weak areas.".to_string());
    } else {
        let lines: Vec<String> = selection
            .selected_solutions
            .iter()
            .map(|s| {
                format!(
                    "{}. {}\n   Issue fit: {}\n   Regional fit: {}\n   Industry fit: {}\n   Expected impact: {}",
                    s.priority, s.name, s.issue_fit, s.regional_fit, s.industry_fit, s.expected_impact
                )
            })
            .collect();
        out.push(format!("[Proposed initiatives]\n{}", lines.join("\n")));
    }

    if let Some(impact) = &plan.impact {
        let q = &impact.quantitative_impact;
        out.push(format!(
            "[Expected impact]\nRevenue: {}\nProfit margin: {}\nCash flow: {}\nQualitative: {}",
            q.revenue, q.profit_margin, q.cash_flow, impact.qualitative_impact.narrative
        ));
    }
    if let Some(phases) = &plan.roadmap {
        out.push(format!(
            "[Roadmap ideal states]\nShort term: {}\nMid term: {}\nLong term: {}",
            phases.short_term.ideal_state, phases.mid_term.ideal_state, phases.long_term.ideal_state
        ));
    }
    out.join("\n\n")
}

fn summary_shape() -> Shape {
    Shape::object([Field::required("content", Shape::String)])
}

pub struct Summary;

impl Stage for Summary {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let features: LocalFeatures = read(inputs, &LOCAL_FEATURES)?;
        let scores: ReportScores = read(inputs, &REPORT_SCORES)?;
        let selection: SolutionSelection = read(inputs, &SOLUTION_SELECTION)?;
        let plan: RoadmapPlan = read(inputs, &ROADMAP)?;

        let analysis = analysis_text(&features, &scores, &selection, &plan);
        let exemplar = ctx.exemplars().block("executive_summary");
        let prompt = render(
            SUMMARY_PROMPT,
            &[("analysis", analysis.as_str()), ("exemplar", exemplar.as_str())],
        );
        let reply = ctx.ask(DESCRIPTOR.name, SECTION_ID, &prompt, &summary_shape())?;
        let content = reply
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .replace('\n', " ");
        let summary = ExecutiveSummary::new(content);
        tracing::info!(chars = summary.char_count, "executive summary written");

        let value = serde_json::to_value(&summary)
            .map_err(|err| PipelineError::json("serialize executive_summary", err))?;
        Ok(StageOutputs::new().with_json(EXECUTIVE_SUMMARY, value))
    }
}
