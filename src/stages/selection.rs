//! Stage 3: find weak tags, match catalog initiatives against them, and let
//! the model pick and argue the best fits.
use super::catalog::{load_catalog, load_outlook, outlook_digest, Catalog};
use super::prompts::{render, SELECTION};
use super::scoring::{LocalFeatures, ReportScores};
use super::taxonomy::{self, TAGS};
use super::{array_field, round2, str_field, StageContext, LOCAL_FEATURES, REPORT_SCORES, SOLUTION_SELECTION};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{Field, Shape};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "selection",
    ordinal: 3,
    inputs: &[REPORT_SCORES, LOCAL_FEATURES],
    outputs: &[SOLUTION_SELECTION],
};

pub const WEAK_THRESHOLD: f64 = 3.0;
pub const LOW_ITEM_THRESHOLD: u8 = 3;
const LOW_ITEMS_IN_PROMPT: usize = 20;
const MAX_CANDIDATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAverage {
    pub tag: String,
    pub label: String,
    pub avg_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowScoreItem {
    pub tag: String,
    pub item: String,
    pub score: u8,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub matched_tags: Vec<String>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedSolution {
    pub name: String,
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub issue_fit: String,
    #[serde(default)]
    pub regional_fit: String,
    #[serde(default)]
    pub industry_fit: String,
    #[serde(default)]
    pub expected_impact: String,
    #[serde(default)]
    pub addressed_weaknesses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSelection {
    pub company_code: String,
    pub document: String,
    pub tag_averages: Vec<TagAverage>,
    pub weak_tags: Vec<TagAverage>,
    pub low_score_items: Vec<LowScoreItem>,
    pub candidates: Vec<Candidate>,
    pub selected_solutions: Vec<SelectedSolution>,
}

/// Average per tag in taxonomy order; unscored tags count as 0.
pub fn tag_averages(scores: &ReportScores) -> Vec<TagAverage> {
    TAGS.iter()
        .map(|tag| TagAverage {
            tag: tag.key.to_string(),
            label: tag.label.to_string(),
            avg_score: scores
                .scores
                .iter()
                .find(|score| score.tag == tag.key)
                .and_then(|score| score.avg_score)
                .unwrap_or(0.0),
        })
        .collect()
}

/// Tags averaging at or below the threshold, weakest first.
pub fn weak_tags(averages: &[TagAverage]) -> Vec<TagAverage> {
    let mut weak: Vec<TagAverage> = averages
        .iter()
        .filter(|avg| avg.avg_score <= WEAK_THRESHOLD)
        .cloned()
        .collect();
    weak.sort_by(|a, b| a.avg_score.partial_cmp(&b.avg_score).unwrap_or(Ordering::Equal));
    weak
}

/// Scored items at or below the threshold, lowest first.
pub fn low_score_items(scores: &ReportScores) -> Vec<LowScoreItem> {
    let mut low: Vec<LowScoreItem> = scores
        .scores
        .iter()
        .flat_map(|tag| {
            tag.items.iter().filter_map(move |item| match item.score {
                Some(score) if score <= LOW_ITEM_THRESHOLD => Some(LowScoreItem {
                    tag: tag.tag.clone(),
                    item: item.item.clone(),
                    score,
                    rationale: item.rationale.clone(),
                }),
                _ => None,
            })
        })
        .collect();
    low.sort_by_key(|item| item.score);
    low
}

/// Initiatives targeting at least one weak tag, ranked by
/// `matched + sum(4 - avg)` over the matched tags.
pub fn rank_candidates(catalog: &Catalog, weak: &[TagAverage]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = catalog
        .iter()
        .filter_map(|(name, initiative)| {
            let mut matched: Vec<&TagAverage> = Vec::new();
            for category in &initiative.target_categories {
                let Some(tag) = taxonomy::by_no(category.no) else {
                    continue;
                };
                if let Some(avg) = weak.iter().find(|avg| avg.tag == tag.key) {
                    if !matched.iter().any(|m| m.tag == avg.tag) {
                        matched.push(avg);
                    }
                }
            }
            if matched.is_empty() {
                return None;
            }
            let gap: f64 = matched.iter().map(|avg| 4.0 - avg.avg_score).sum();
            Some(Candidate {
                name: name.clone(),
                matched_tags: matched.iter().map(|avg| avg.tag.clone()).collect(),
                relevance: round2(matched.len() as f64 + gap),
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    candidates.truncate(MAX_CANDIDATES);
    candidates
}

fn selection_shape() -> Shape {
    Shape::object([Field::required(
        "selected_solutions",
        Shape::array_of(Shape::object([
            Field::required("name", Shape::String),
            Field::required("priority", Shape::Integer),
            Field::optional("relevance_score", Shape::nullable(Shape::Number)),
            Field::optional("issue_fit", Shape::nullable(Shape::String)),
            Field::optional("regional_fit", Shape::nullable(Shape::String)),
            Field::optional("industry_fit", Shape::nullable(Shape::String)),
            Field::optional("expected_impact", Shape::nullable(Shape::String)),
            Field::optional("addressed_weaknesses", Shape::nullable(Shape::array_of(Shape::Any))),
        ])),
    )])
}

fn parse_selected(reply: &Value, candidates: &[Candidate]) -> Vec<SelectedSolution> {
    let mut selected: Vec<SelectedSolution> = array_field(reply, "selected_solutions")
        .iter()
        .map(|entry| SelectedSolution {
            name: str_field(entry, "name").to_string(),
            priority: entry.get("priority").and_then(Value::as_i64).unwrap_or(i64::MAX),
            relevance_score: entry.get("relevance_score").and_then(Value::as_f64),
            issue_fit: str_field(entry, "issue_fit").to_string(),
            regional_fit: str_field(entry, "regional_fit").to_string(),
            industry_fit: str_field(entry, "industry_fit").to_string(),
            expected_impact: str_field(entry, "expected_impact").to_string(),
            addressed_weaknesses: array_field(entry, "addressed_weaknesses")
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        })
        .collect();
    for solution in &selected {
        if !candidates.iter().any(|c| c.name == solution.name) {
            tracing::warn!(name = %solution.name, "model selected a name outside the candidates");
        }
    }
    selected.sort_by_key(|solution| solution.priority);
    selected
}

fn scores_block(averages: &[TagAverage]) -> String {
    averages
        .iter()
        .map(|avg| format!("  - {}: {:.2}", avg.label, avg.avg_score))
        .collect::<Vec<_>>()
        .join("\n")
}

fn low_items_block(low: &[LowScoreItem]) -> String {
    if low.is_empty() {
        return "  (none)".to_string();
    }
    low.iter()
        .take(LOW_ITEMS_IN_PROMPT)
        .map(|item| {
            let label = taxonomy::find(&item.tag).map(|tag| tag.label).unwrap_or(item.tag.as_str());
            format!("  - [{label}] {} (score {}): {}", item.item, item.score, item.rationale)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn features_block(features: &LocalFeatures) -> String {
    format!(
        "Location: {}\nIndustry: {}\n[Business]\n{}\n[Human capital]\n{}\n[Financial]\n{}\n[Overall]\n{}",
        features.company.location.as_deref().unwrap_or("unknown"),
        features.company.industry.as_deref().unwrap_or("unknown"),
        features.features.business,
        features.features.human_capital,
        features.features.financial,
        features.overall,
    )
}

fn candidates_block(catalog: &Catalog, candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let initiative = catalog.get(&candidate.name);
            format!(
                "{}. {} (relevance {:.2}; weak tags: {})\n   Overview: {}\n   Regional relevance: {}",
                idx + 1,
                candidate.name,
                candidate.relevance,
                candidate.matched_tags.join(", "),
                initiative.map(|i| i.overview.as_str()).unwrap_or_default(),
                initiative.map(|i| i.regional_relevance.as_str()).unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Selection;

impl Stage for Selection {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let scores: ReportScores = serde_json::from_value(inputs.get(&REPORT_SCORES)?.clone())
            .map_err(|err| PipelineError::json("read report_scores", err))?;
        let features: LocalFeatures = serde_json::from_value(inputs.get(&LOCAL_FEATURES)?.clone())
            .map_err(|err| PipelineError::json("read local_features", err))?;
        let catalog = load_catalog(ctx.sources.catalog.as_deref())?;

        let averages = tag_averages(&scores);
        let weak = weak_tags(&averages);
        let low = low_score_items(&scores);
        let candidates = rank_candidates(&catalog, &weak);
        tracing::info!(
            weak = weak.len(),
            low_items = low.len(),
            candidates = candidates.len(),
            "selection inputs ready"
        );

        let selected_solutions = if candidates.is_empty() {
            tracing::info!("no catalog initiative matches a weak tag; skipping LM call");
            Vec::new()
        } else {
            let outlook = load_outlook(ctx.sources.outlook.as_deref())?
                .map(|text| outlook_digest(&text))
                .unwrap_or_else(|| "(no industry outlook provided)".to_string());
            let candidate_count = candidates.len().to_string();
            let exemplar = ctx.exemplars().block("selection");
            let prompt = render(
                SELECTION,
                &[
                    ("document", scores.document.as_str()),
                    ("scores", scores_block(&averages).as_str()),
                    ("low_items", low_items_block(&low).as_str()),
                    ("features", features_block(&features).as_str()),
                    ("outlook", outlook.as_str()),
                    ("candidates", candidates_block(&catalog, &candidates).as_str()),
                    ("candidate_count", candidate_count.as_str()),
                    ("exemplar", exemplar.as_str()),
                ],
            );
            let reply = ctx.ask(DESCRIPTOR.name, "initiatives", &prompt, &selection_shape())?;
            parse_selected(&reply, &candidates)
        };

        let selection = SolutionSelection {
            company_code: scores.company_code.clone(),
            document: scores.document.clone(),
            tag_averages: averages,
            weak_tags: weak,
            low_score_items: low,
            candidates,
            selected_solutions,
        };
        let value = serde_json::to_value(&selection)
            .map_err(|err| PipelineError::json("serialize solution_selection", err))?;
        Ok(StageOutputs::new().with_json(SOLUTION_SELECTION, value))
    }
}
