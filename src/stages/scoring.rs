//! Stage 2: score every taxonomy tag against its evaluation items, then
//! derive the company's regional features.
//!
//! Tags are scored in taxonomy order except `management_strategy`, which goes
//! last so its prompt can carry every other tag's average and summary. A tag
//! with no sections gets null scores without an LM call, except management
//! (judged from cross-tag context) and finance when financials exist.
use super::extraction::TaggedReport;
use super::financials::{indices_text, Financials};
use super::prompts::{render, LOCAL_FEATURE, OVERALL_FEATURE, SCORING};
use super::taxonomy::{self, Tag, BUSINESS_TAG, FINANCE_TAG, HUMAN_CAPITAL_TAG, MANAGEMENT_TAG, TAGS};
use super::{round2, StageContext, LOCAL_FEATURES, REPORT_SCORES, REPORT_TAGGED};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{Field, Shape};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use crate::util::truncate_chars;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "scoring",
    ordinal: 2,
    inputs: &[REPORT_TAGGED],
    outputs: &[REPORT_SCORES, LOCAL_FEATURES],
};

const NO_SECTION_RATIONALE: &str = "No matching section";
const NO_SECTION_SUMMARY: &str = "No matching section was found in the report.";
const NOT_ASSESSABLE: &str = "not assessable";
const MANAGEMENT_PLACEHOLDER: &str = "(No section of the report maps directly to this tag.)";
const FINANCE_PLACEHOLDER: &str = "(No finance section was tagged; judge from the financial indices.)";
const FEATURE_SECTION_CHARS: usize = 3000;
const FINANCE_FEATURE_SECTION_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub item: String,
    pub score: Option<u8>,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagScore {
    pub tag: String,
    pub label: String,
    pub items: Vec<ItemScore>,
    pub summary: String,
    pub avg_score: Option<f64>,
}

impl TagScore {
    fn unscored(tag: &Tag) -> Self {
        Self {
            tag: tag.key.to_string(),
            label: tag.label.to_string(),
            items: tag
                .items
                .iter()
                .map(|item| ItemScore {
                    item: item.to_string(),
                    score: None,
                    rationale: NO_SECTION_RATIONALE.to_string(),
                })
                .collect(),
            summary: NO_SECTION_SUMMARY.to_string(),
            avg_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportScores {
    pub document: String,
    pub company_code: String,
    pub scores: Vec<TagScore>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub code: String,
    pub document: String,
    pub location: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryFeatures {
    pub business: String,
    pub human_capital: String,
    pub financial: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalFeatures {
    pub company: CompanyProfile,
    pub features: CategoryFeatures,
    pub overall: String,
}

/// One section of the report with its page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSection {
    pub page: usize,
    pub text: String,
}

/// Sections of the tagged report regrouped by tag.
pub fn group_by_tag(report: &TaggedReport) -> BTreeMap<String, Vec<PageSection>> {
    let mut groups: BTreeMap<String, Vec<PageSection>> = BTreeMap::new();
    for page in &report.pages {
        for section in &page.sections {
            groups
                .entry(taxonomy::normalize(&section.tag).to_string())
                .or_default()
                .push(PageSection {
                    page: page.page,
                    text: section.text.clone(),
                });
        }
    }
    groups
}

fn section_text(sections: &[PageSection]) -> String {
    sections
        .iter()
        .filter(|section| !section.text.trim().is_empty())
        .map(|section| format!("[p.{}] {}", section.page, section.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Section text capped at `max_chars`, cutting the last part short.
fn capped_section_text(sections: &[PageSection], max_chars: usize) -> String {
    let mut parts = Vec::new();
    let mut total = 0;
    for section in sections.iter().filter(|s| !s.text.trim().is_empty()) {
        let part = format!("[p.{}] {}", section.page, section.text);
        let len = part.chars().count();
        if total + len > max_chars {
            let remaining = max_chars.saturating_sub(total);
            if remaining > 100 {
                parts.push(format!("{}...(truncated)", truncate_chars(&part, remaining)));
            }
            break;
        }
        total += len;
        parts.push(part);
    }
    parts.join("\n\n")
}

fn scoring_shape() -> Shape {
    Shape::object([
        Field::required(
            "items",
            Shape::array_of(Shape::object([
                Field::optional("item", Shape::String),
                Field::required("score", Shape::nullable(Shape::Number)),
                Field::optional("rationale", Shape::nullable(Shape::String)),
            ])),
        ),
        Field::required("summary", Shape::String),
    ])
}

fn summary_shape() -> Shape {
    Shape::object([Field::required("summary", Shape::String)])
}

/// Valid scores are integers 1 through 5; anything else becomes null.
fn clamp_score(value: Option<&Value>) -> Option<u8> {
    let number = value?.as_f64()?;
    if number.fract() != 0.0 || !(1.0..=5.0).contains(&number) {
        return None;
    }
    Some(number as u8)
}

pub fn average(items: &[ItemScore]) -> Option<f64> {
    let scores: Vec<f64> = items.iter().filter_map(|item| item.score).map(f64::from).collect();
    if scores.is_empty() {
        return None;
    }
    Some(round2(scores.iter().sum::<f64>() / scores.len() as f64))
}

/// Align model items with the tag's items: pad with nulls, drop extras.
fn align_items(tag: &Tag, reply: &Value) -> Vec<ItemScore> {
    let returned = reply.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    if returned.len() != tag.items.len() {
        tracing::warn!(
            tag = tag.key,
            expected = tag.items.len(),
            returned = returned.len(),
            "item count mismatch"
        );
    }
    tag.items
        .iter()
        .enumerate()
        .map(|(idx, item)| match returned.get(idx) {
            Some(entry) => ItemScore {
                item: item.to_string(),
                score: clamp_score(entry.get("score")),
                rationale: entry
                    .get("rationale")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            None => ItemScore {
                item: item.to_string(),
                score: None,
                rationale: NOT_ASSESSABLE.to_string(),
            },
        })
        .collect()
}

/// Average and summary of an already scored tag, for the management prompt.
#[derive(Debug, Clone)]
struct CrossTagSummary {
    label: String,
    avg: f64,
    summary: String,
}

fn score_tag(
    ctx: &StageContext<'_>,
    tag: &Tag,
    sections: &[PageSection],
    financials: Option<&Financials>,
    cross: &[CrossTagSummary],
) -> PipelineResult<TagScore> {
    let is_management = tag.key == MANAGEMENT_TAG;
    let mut text = section_text(sections);
    if text.trim().is_empty() {
        if is_management && !cross.is_empty() {
            text = MANAGEMENT_PLACEHOLDER.to_string();
        } else if tag.key == FINANCE_TAG && financials.is_some() {
            text = FINANCE_PLACEHOLDER.to_string();
        } else {
            tracing::info!(tag = tag.key, "no sections; skipping LM call");
            return Ok(TagScore::unscored(tag));
        }
    }

    let items = tag
        .items
        .iter()
        .enumerate()
        .map(|(idx, item)| format!("  {}. {item}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let financial_block = match financials {
        Some(fin) if tag.key == FINANCE_TAG => format!("\n\nFinancial indices:\n{}", indices_text(fin)),
        _ => String::new(),
    };
    let (cross_block, management_note) = if is_management && !cross.is_empty() {
        let lines = cross
            .iter()
            .map(|c| format!("  - {} (average {:.1}): {}", c.label, c.avg, c.summary))
            .collect::<Vec<_>>()
            .join("\n");
        (
            format!("\n\nResults for the other tags (for reference):\n{lines}"),
            "\n- This tag spans all the others. Use their results to judge whether the strategy is consistent with each area.".to_string(),
        )
    } else {
        (String::new(), String::new())
    };
    let item_count = tag.items.len().to_string();
    let exemplar = ctx.exemplars().block("scoring");
    let prompt = render(
        SCORING,
        &[
            ("tag_label", tag.label),
            ("items", items.as_str()),
            ("item_count", item_count.as_str()),
            ("management_note", management_note.as_str()),
            ("sections", text.as_str()),
            ("financials", financial_block.as_str()),
            ("cross_tag", cross_block.as_str()),
            ("exemplar", exemplar.as_str()),
        ],
    );
    let reply = ctx.ask(DESCRIPTOR.name, tag.key, &prompt, &scoring_shape())?;
    let items = align_items(tag, &reply);
    let avg_score = average(&items);
    tracing::info!(tag = tag.key, avg = ?avg_score, "tag scored");
    Ok(TagScore {
        tag: tag.key.to_string(),
        label: tag.label.to_string(),
        items,
        summary: reply
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        avg_score,
    })
}

/// Score all tags; management last with cross-tag context.
pub fn score_report(
    ctx: &StageContext<'_>,
    groups: &BTreeMap<String, Vec<PageSection>>,
    financials: Option<&Financials>,
) -> PipelineResult<Vec<TagScore>> {
    let empty: Vec<PageSection> = Vec::new();
    let sections_for = |key: &str| groups.get(key).unwrap_or(&empty);
    let mut scored: BTreeMap<&'static str, TagScore> = BTreeMap::new();
    let mut cross = Vec::new();
    for tag in TAGS.iter().filter(|tag| tag.key != MANAGEMENT_TAG) {
        let result = score_tag(ctx, tag, sections_for(tag.key), financials, &[])?;
        cross.push(CrossTagSummary {
            label: tag.label.to_string(),
            avg: result.avg_score.unwrap_or(0.0),
            summary: result.summary.clone(),
        });
        scored.insert(tag.key, result);
    }
    if let Some(management) = taxonomy::find(MANAGEMENT_TAG) {
        let result = score_tag(ctx, management, sections_for(MANAGEMENT_TAG), financials, &cross)?;
        scored.insert(management.key, result);
    }
    Ok(TAGS
        .iter()
        .filter_map(|tag| scored.remove(tag.key))
        .collect())
}

struct FeatureCategory {
    key: &'static str,
    tag: &'static str,
    title: &'static str,
    points: &'static [&'static str],
}

const FEATURE_CATEGORIES: &[FeatureCategory] = &[
    FeatureCategory {
        key: "business",
        tag: BUSINESS_TAG,
        title: "regional characteristics of business, sales and order strategy",
        points: &[
            "Construction demand in the region (public versus private work, infrastructure needs)",
            "How the business portfolio relates to the regional economy",
            "Regional traits of the order strategy (reliance on public agencies, local versus wide-area reach)",
            "Business opportunities and risks specific to the region",
        ],
    },
    FeatureCategory {
        key: "human_capital",
        tag: HUMAN_CAPITAL_TAG,
        title: "regional characteristics of human capital",
        points: &[
            "Headcount, average age and tenure against regional trends",
            "Region-specific hiring and retention issues",
            "Personnel cost levels against the regional labour market",
            "Regional differences in training and working-style reform",
        ],
    },
    FeatureCategory {
        key: "financial",
        tag: FINANCE_TAG,
        title: "regional characteristics of the financial structure",
        points: &[
            "Profit structure (gross and operating margin) against regional trends",
            "Financial safety (equity ratio, D/E ratio)",
            "Cash flow structure and working capital management",
            "Capital efficiency (ROE, ROA) and growth",
        ],
    },
];

fn company_header(profile: &CompanyProfile, financials: Option<&Financials>) -> String {
    let employees = financials
        .and_then(|fin| fin.company.employees)
        .map(|n| format!("{n:.0}"))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Company: code {}, location {}, industry {}, employees {}, document {}",
        profile.code,
        profile.location.as_deref().unwrap_or("unknown"),
        profile.industry.as_deref().unwrap_or("unknown"),
        employees,
        profile.document,
    )
}

fn feature_summary(ctx: &StageContext<'_>, label: &str, prompt: &str) -> PipelineResult<String> {
    let reply = ctx.ask(DESCRIPTOR.name, label, prompt, &summary_shape())?;
    Ok(reply
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Three category features plus an overall synthesis.
pub fn extract_local_features(
    ctx: &StageContext<'_>,
    report: &TaggedReport,
    groups: &BTreeMap<String, Vec<PageSection>>,
) -> PipelineResult<LocalFeatures> {
    let financials = report.financials.as_ref();
    let company = CompanyProfile {
        code: report.company_code.clone(),
        document: report.document.clone(),
        location: financials.and_then(|fin| fin.company.location.clone()),
        industry: financials.and_then(|fin| fin.company.industry.clone()),
    };
    let header = company_header(&company, financials);
    let exemplar = ctx.exemplars().block("local_feature");

    let mut texts: BTreeMap<&'static str, String> = BTreeMap::new();
    for category in FEATURE_CATEGORIES {
        let max_chars = if category.tag == FINANCE_TAG {
            FINANCE_FEATURE_SECTION_CHARS
        } else {
            FEATURE_SECTION_CHARS
        };
        let mut sections = groups
            .get(category.tag)
            .map(|sections| capped_section_text(sections, max_chars))
            .unwrap_or_default();
        if sections.trim().is_empty() {
            sections = "(no matching sections)".to_string();
        }
        if let (Some(fin), true) = (financials, category.tag == FINANCE_TAG) {
            sections.push_str("\n\n");
            sections.push_str(&indices_text(fin));
        }
        let label = taxonomy::find(category.tag).map(|tag| tag.label).unwrap_or(category.tag);
        let points = category
            .points
            .iter()
            .enumerate()
            .map(|(idx, point)| format!("  {}. {point}", idx + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render(
            LOCAL_FEATURE,
            &[
                ("category", category.title),
                ("tag_label", label),
                ("points", points.as_str()),
                ("company", header.as_str()),
                ("sections", sections.as_str()),
                ("exemplar", exemplar.as_str()),
            ],
        );
        let text = feature_summary(ctx, &format!("feature:{}", category.key), &prompt)?;
        texts.insert(category.key, text);
    }

    let features = CategoryFeatures {
        business: texts.remove("business").unwrap_or_default(),
        human_capital: texts.remove("human_capital").unwrap_or_default(),
        financial: texts.remove("financial").unwrap_or_default(),
    };
    let categories = format!(
        "[Business, sales and order strategy]\n{}\n\n[Human capital]\n{}\n\n[Financial structure]\n{}",
        features.business, features.human_capital, features.financial
    );
    let overall_exemplar = ctx.exemplars().block("overall_feature");
    let prompt = render(
        OVERALL_FEATURE,
        &[
            ("categories", categories.as_str()),
            ("exemplar", overall_exemplar.as_str()),
        ],
    );
    let overall = feature_summary(ctx, "feature:overall", &prompt)?;
    Ok(LocalFeatures {
        company,
        features,
        overall,
    })
}

pub struct Scoring;

impl Stage for Scoring {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let report: TaggedReport = serde_json::from_value(inputs.get(&REPORT_TAGGED)?.clone())
            .map_err(|err| PipelineError::json("read report_tagged", err))?;
        let groups = group_by_tag(&report);
        tracing::info!(tags = groups.len(), "sections grouped by tag");

        let scores = score_report(ctx, &groups, report.financials.as_ref())?;
        let features = extract_local_features(ctx, &report, &groups)?;

        let scores = ReportScores {
            document: report.document.clone(),
            company_code: report.company_code.clone(),
            scores,
        };
        let scores = serde_json::to_value(&scores).map_err(|err| PipelineError::json("serialize report_scores", err))?;
        let features =
            serde_json::to_value(&features).map_err(|err| PipelineError::json("serialize local_features", err))?;
        Ok(StageOutputs::new()
            .with_json(REPORT_SCORES, scores)
            .with_json(LOCAL_FEATURES, features))
    }
}
