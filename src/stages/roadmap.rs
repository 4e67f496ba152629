//! Stage 4: impact estimate, phased roadmap and risk review for the
//! selected initiatives.
use super::financials::{self, indices_text};
use super::prompts::{render, IMPACT, RISKS, ROADMAP as ROADMAP_PROMPT};
use super::selection::{SelectedSolution, SolutionSelection};
use super::{StageContext, REPORT_TAGGED, ROADMAP, SOLUTION_SELECTION};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{Field, Shape};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "roadmap",
    ordinal: 4,
    inputs: &[SOLUTION_SELECTION, REPORT_TAGGED],
    outputs: &[ROADMAP],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantitativeImpact {
    pub revenue: String,
    pub profit_margin: String,
    pub cash_flow: String,
    pub calculation_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitativeImpact {
    pub effects: Vec<String>,
    pub narrative: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactEstimate {
    pub assumptions: Vec<String>,
    pub conservativeness_note: String,
    pub quantitative_impact: QuantitativeImpact,
    pub qualitative_impact: QualitativeImpact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    pub actions: Vec<String>,
    pub ideal_state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phases {
    pub short_term: Phase,
    pub mid_term: Phase,
    pub long_term: Phase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Risk {
    pub risk_type: String,
    pub risk: String,
    pub mitigation: String,
    pub trigger_or_signal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadmapPlan {
    pub company_code: String,
    pub document: String,
    pub impact: Option<ImpactEstimate>,
    pub roadmap: Option<Phases>,
    pub risks: Vec<Risk>,
}

fn nullable_string() -> Shape {
    Shape::nullable(Shape::String)
}

fn impact_shape() -> Shape {
    Shape::object([
        Field::required("assumptions", Shape::array_of(Shape::String)),
        Field::optional("conservativeness_note", nullable_string()),
        Field::required(
            "quantitative_impact",
            Shape::object([
                Field::optional("revenue", nullable_string()),
                Field::optional("profit_margin", nullable_string()),
                Field::optional("cash_flow", nullable_string()),
                Field::optional("calculation_notes", nullable_string()),
            ]),
        ),
        Field::required(
            "qualitative_impact",
            Shape::object([
                Field::optional("effects", Shape::array_of(Shape::String)),
                Field::optional("narrative", nullable_string()),
            ]),
        ),
    ])
}

fn phase_shape() -> Shape {
    Shape::object([
        Field::required("actions", Shape::array_of(Shape::String)),
        Field::optional("ideal_state", nullable_string()),
    ])
}

fn roadmap_shape() -> Shape {
    Shape::object([
        Field::required("short_term", phase_shape()),
        Field::required("mid_term", phase_shape()),
        Field::required("long_term", phase_shape()),
    ])
}

fn risks_shape() -> Shape {
    Shape::object([Field::required(
        "risks",
        Shape::array_of(Shape::object([
            Field::required("risk_type", Shape::String),
            Field::required("risk", Shape::String),
            Field::required("mitigation", Shape::String),
            Field::optional("trigger_or_signal", nullable_string()),
        ])),
    )])
}

/// Drop null members so typed decoding falls back to field defaults.
fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

fn decode<T: DeserializeOwned>(mut value: Value) -> PipelineResult<T> {
    let raw = value.to_string();
    strip_nulls(&mut value);
    serde_json::from_value(value).map_err(|err| PipelineError::MalformedResponse {
        reason: err.to_string(),
        raw,
    })
}

/// Prompt text describing the selected initiatives, in priority order.
pub fn selection_text(selected: &[SelectedSolution]) -> String {
    selected
        .iter()
        .map(|solution| {
            let mut lines = vec![format!("Priority {}: {}", solution.priority, solution.name)];
            if !solution.addressed_weaknesses.is_empty() {
                lines.push(format!("  Addresses: {}", solution.addressed_weaknesses.join(", ")));
            }
            for (label, text) in [
                ("Issue fit", &solution.issue_fit),
                ("Regional fit", &solution.regional_fit),
                ("Industry fit", &solution.industry_fit),
                ("Expected impact", &solution.expected_impact),
            ] {
                if !text.is_empty() {
                    lines.push(format!("  {label}: {text}"));
                }
            }
            lines.join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct Roadmap;

impl Stage for Roadmap {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let selection: SolutionSelection = serde_json::from_value(inputs.get(&SOLUTION_SELECTION)?.clone())
            .map_err(|err| PipelineError::json("read solution_selection", err))?;
        let financials = financials::from_artifact(inputs.get(&REPORT_TAGGED)?);

        let mut plan = RoadmapPlan {
            company_code: selection.company_code.clone(),
            document: selection.document.clone(),
            ..RoadmapPlan::default()
        };
        if selection.selected_solutions.is_empty() {
            tracing::info!("nothing selected; roadmap left empty");
            return emit(&plan);
        }

        let selected = selection_text(&selection.selected_solutions);
        let financial_text = financials
            .as_ref()
            .map(indices_text)
            .unwrap_or_else(|| "(no financial statements available)".to_string());

        let exemplar = ctx.exemplars().block("impact");
        let prompt = render(
            IMPACT,
            &[
                ("financials", financial_text.as_str()),
                ("selection", selected.as_str()),
                ("exemplar", exemplar.as_str()),
            ],
        );
        let impact = ctx.ask(DESCRIPTOR.name, "impact", &prompt, &impact_shape())?;
        plan.impact = Some(decode(impact)?);

        let exemplar = ctx.exemplars().block("roadmap");
        let prompt = render(
            ROADMAP_PROMPT,
            &[("selection", selected.as_str()), ("exemplar", exemplar.as_str())],
        );
        let phases = ctx.ask(DESCRIPTOR.name, "roadmap", &prompt, &roadmap_shape())?;
        plan.roadmap = Some(decode(phases)?);

        let exemplar = ctx.exemplars().block("risks");
        let prompt = render(RISKS, &[("selection", selected.as_str()), ("exemplar", exemplar.as_str())]);
        let risks = ctx.ask(DESCRIPTOR.name, "risks", &prompt, &risks_shape())?;
        let risks = risks.get("risks").cloned().unwrap_or(Value::Array(Vec::new()));
        plan.risks = decode(risks)?;
        if plan.risks.len() != 3 {
            tracing::warn!(count = plan.risks.len(), "expected three risk entries");
        }

        emit(&plan)
    }
}

fn emit(plan: &RoadmapPlan) -> PipelineResult<StageOutputs> {
    let value = serde_json::to_value(plan).map_err(|err| PipelineError::json("serialize roadmap", err))?;
    Ok(StageOutputs::new().with_json(ROADMAP, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::llm::LlmClient;
    use crate::run::ArtifactData;
    use crate::stages::sources::SourceSet;
    use crate::stages::testing::{prompts_for, ScriptedTransport};
    use serde_json::json;

    const IMPACT_REPLY: &str = r#"{"assumptions": ["orders flat"], "conservativeness_note": null,
        "quantitative_impact": {"revenue": "+1-2%", "profit_margin": "3.05% -> 4.0-5.0%"},
        "qualitative_impact": {"effects": ["steadier orders"], "narrative": "n"}}"#;
    const ROADMAP_REPLY: &str = r#"{"short_term": {"actions": ["pilot"], "ideal_state": "s"},
        "mid_term": {"actions": ["roll out"]}, "long_term": {"actions": ["scale"], "ideal_state": "l"}}"#;
    const RISKS_REPLY: &str = r#"{"risks": [
        {"risk_type": "execution", "risk": "r", "mitigation": "m", "trigger_or_signal": "t"},
        {"risk_type": "external", "risk": "r", "mitigation": "m"},
        {"risk_type": "fallback", "risk": "r", "mitigation": "m", "trigger_or_signal": "t"}]}"#;

    fn selection(selected: Vec<SelectedSolution>) -> Value {
        serde_json::to_value(SolutionSelection {
            company_code: "1234".to_string(),
            document: "report.pdf".to_string(),
            tag_averages: Vec::new(),
            weak_tags: Vec::new(),
            low_score_items: Vec::new(),
            candidates: Vec::new(),
            selected_solutions: selected,
        })
        .expect("selection value")
    }

    fn execute(transport: ScriptedTransport, selected: Vec<SelectedSolution>) -> (PipelineResult<StageOutputs>, usize) {
        let log = transport.prompt_log();
        let client = LlmClient::new(Box::new(transport));
        let config = PipelineConfig::default();
        let sources = SourceSet::default();
        let ctx = StageContext::new(&config, &sources, &client);
        let mut inputs = StageInputs::default();
        inputs.insert(&SOLUTION_SELECTION, selection(selected));
        inputs.insert(&REPORT_TAGGED, json!({"financials": null}));
        let result = Roadmap.execute(&ctx, &inputs);
        let calls = log.borrow().len();
        (result, calls)
    }

    fn site_dx() -> SelectedSolution {
        SelectedSolution {
            name: "Site DX".to_string(),
            priority: 1,
            expected_impact: "shorter schedules".to_string(),
            ..SelectedSolution::default()
        }
    }

    #[test]
    fn empty_selection_skips_calls() {
        let (result, calls) = execute(ScriptedTransport::new(), Vec::new());
        let outputs = result.expect("execute");
        let Some(ArtifactData::Json(value)) = outputs.get(&ROADMAP) else {
            panic!("roadmap missing");
        };
        assert_eq!(calls, 0);
        assert_eq!(value["impact"], Value::Null);
        assert_eq!(value["roadmap"], Value::Null);
        assert_eq!(value["risks"], json!([]));
    }

    #[test]
    fn three_calls_fill_the_plan() {
        let transport = ScriptedTransport::new()
            .reply("impact-estimate", IMPACT_REPLY)
            .reply("execution-roadmap", ROADMAP_REPLY)
            .reply("risk-review", RISKS_REPLY);
        let log = transport.prompt_log();
        let (result, calls) = execute(transport, vec![site_dx()]);
        let outputs = result.expect("execute");
        assert_eq!(calls, 3);
        let Some(ArtifactData::Json(value)) = outputs.get(&ROADMAP) else {
            panic!("roadmap missing");
        };
        assert_eq!(value["impact"]["quantitative_impact"]["cash_flow"], "");
        assert_eq!(value["impact"]["conservativeness_note"], "");
        assert_eq!(value["roadmap"]["mid_term"]["ideal_state"], "");
        assert_eq!(value["risks"][1]["trigger_or_signal"], "");
        let impact = prompts_for(&log, "impact-estimate");
        assert!(impact[0].contains("Priority 1: Site DX"));
        assert!(impact[0].contains("(no financial statements available)"));
    }

    #[test]
    fn wrongly_typed_fields_are_malformed() {
        let transport = ScriptedTransport::new().reply(
            "impact-estimate",
            r#"{"assumptions": [], "quantitative_impact": {"revenue": 5}, "qualitative_impact": {}}"#,
        );
        let (result, _) = execute(transport, vec![site_dx()]);
        assert!(matches!(result, Err(PipelineError::MalformedResponse { .. })));
    }
}
