//! Stage 6: map every upstream artifact onto the report document.
//!
//! No LM calls. Section order is fixed: executive summary, company overview,
//! industry environment (only with an outlook file), analysis, strategy,
//! impact, roadmap, risks.
use super::catalog::{case_examples, load_catalog, load_outlook};
use super::document::{DocumentMeta, ReportDocument, Section};
use super::extraction::TaggedReport;
use super::roadmap::{ImpactEstimate, Phase, Phases, Risk, RoadmapPlan};
use super::scoring::{LocalFeatures, ReportScores, TagScore};
use super::selection::{SelectedSolution, SolutionSelection};
use super::summary::ExecutiveSummary;
use super::taxonomy::{short_item_name, FINANCE_TAG};
use super::{
    StageContext, EXECUTIVE_SUMMARY, FINAL_REPORT, LOCAL_FEATURES, REPORT_SCORES, REPORT_TAGGED,
    ROADMAP, SOLUTION_SELECTION,
};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use crate::run::ArtifactSpec;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "assembly",
    ordinal: 6,
    inputs: &[
        REPORT_TAGGED,
        REPORT_SCORES,
        LOCAL_FEATURES,
        SOLUTION_SELECTION,
        ROADMAP,
        EXECUTIVE_SUMMARY,
    ],
    outputs: &[FINAL_REPORT],
};

const MAX_INITIATIVES: usize = 3;
const STRENGTH_KEYWORDS: &[&str] = &["strength", "potential", "leverage", "opportunit", "advantage"];
const CONSTRAINT_KEYWORDS: &[&str] = &["issue", "weak", "risk", "pressure", "constraint", "challenge", "decline"];

fn read<T: DeserializeOwned>(inputs: &StageInputs, spec: &ArtifactSpec) -> PipelineResult<T> {
    serde_json::from_value(inputs.get(spec)?.clone())
        .map_err(|err| PipelineError::json(format!("read {}", spec.name), err))
}

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+|。").expect("valid sentence end regex"));

/// Split regional text into strength and constraint sentences by keyword.
/// A sentence matching both counts as a strength.
pub fn strengths_and_constraints(text: &str) -> (Vec<String>, Vec<String>) {
    let mut strengths = Vec::new();
    let mut constraints = Vec::new();
    for sentence in SENTENCE_END.split(text) {
        let sentence = sentence.trim().trim_end_matches('.');
        if sentence.is_empty() {
            continue;
        }
        let lower = sentence.to_lowercase();
        if STRENGTH_KEYWORDS.iter().any(|k| lower.contains(k)) {
            strengths.push(sentence.to_string());
        } else if CONSTRAINT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            constraints.push(sentence.to_string());
        }
    }
    (strengths, constraints)
}

/// Markdown headings become headings, list items bullets, the rest
/// paragraphs.
pub fn markdown_section(section: &mut Section, markdown: &str) {
    fn flush(section: &mut Section, bullets: &mut Vec<String>, paragraph: &mut Vec<&str>) {
        if !paragraph.is_empty() {
            section.paragraph(paragraph.join(" "));
            paragraph.clear();
        }
        if !bullets.is_empty() {
            section.bullets(std::mem::take(bullets));
        }
    }

    let mut bullets: Vec<String> = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(section, &mut bullets, &mut paragraph);
        } else if trimmed.starts_with('#') {
            flush(section, &mut bullets, &mut paragraph);
            section.heading(trimmed.trim_start_matches('#').trim());
        } else if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
            if !paragraph.is_empty() {
                section.paragraph(paragraph.join(" "));
                paragraph.clear();
            }
            bullets.push(item.trim().to_string());
        } else {
            if !bullets.is_empty() {
                section.bullets(std::mem::take(&mut bullets));
            }
            paragraph.push(trimmed);
        }
    }
    flush(section, &mut bullets, &mut paragraph);
}

fn score_cell(score: Option<u8>) -> String {
    score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}

fn avg_cell(avg: Option<f64>) -> String {
    avg.map(|a| format!("{a:.2}")).unwrap_or_else(|| "-".to_string())
}

fn tag_block(section: &mut Section, tag: &TagScore) {
    section.heading(format!("{} (average {})", tag.label, avg_cell(tag.avg_score)));
    let rows = tag
        .items
        .iter()
        .map(|item| {
            vec![
                short_item_name(&item.item).to_string(),
                score_cell(item.score),
                item.rationale.clone(),
            ]
        })
        .collect();
    section
        .table(&["Item", "Score", "Rationale"], rows)
        .paragraph(tag.summary.clone());
}

fn company_overview(report: &TaggedReport, features: &LocalFeatures) -> Section {
    let mut section = Section::new("company_overview", "Company Overview and Regional Profile");
    let mut rows = vec![
        vec!["Company code".to_string(), report.company_code.clone()],
        vec!["Source document".to_string(), report.document.clone()],
    ];
    if let Some(info) = report.financials.as_ref().map(|fin| &fin.company) {
        for (label, value) in [
            ("Location", info.location.clone()),
            ("Market", info.market.clone()),
            ("Industry", info.industry.clone()),
            ("Employees", info.employees.map(|n| format!("{n:.0}"))),
        ] {
            if let Some(value) = value {
                rows.push(vec![label.to_string(), value]);
            }
        }
    }
    section.table(&["Field", "Value"], rows);
    for (title, text) in [
        ("Business, sales and orders", &features.features.business),
        ("Human capital", &features.features.human_capital),
        ("Financial structure", &features.features.financial),
        ("Overall regional profile", &features.overall),
    ] {
        if !text.trim().is_empty() {
            section.heading(title).paragraph(text.clone());
        }
    }
    section
}

fn analysis(report: &TaggedReport, scores: &ReportScores, selection: &SolutionSelection) -> Section {
    let mut section = Section::new("analysis", "Analysis and Management Issues");
    let rows = selection
        .tag_averages
        .iter()
        .map(|avg| vec![avg.label.clone(), format!("{:.2}", avg.avg_score)])
        .collect();
    section.table(&["Tag", "Average score"], rows);

    section.heading("Financial analysis");
    if let Some(latest) = report.financials.as_ref().and_then(|fin| fin.latest()) {
        let rows = latest
            .indices
            .present()
            .into_iter()
            .map(|(name, value)| vec![name.replace('_', " "), format!("{value}")])
            .collect();
        let header = format!("Indicator (FY{})", latest.year);
        section.table(&[header.as_str(), "Value"], rows);
    }
    if let Some(finance) = scores.scores.iter().find(|tag| tag.tag == FINANCE_TAG) {
        tag_block(&mut section, finance);
    }

    section.heading("Qualitative analysis");
    let mut qualitative: Vec<&TagScore> = scores.scores.iter().filter(|tag| tag.tag != FINANCE_TAG).collect();
    qualitative.sort_by(|a, b| {
        a.avg_score
            .unwrap_or(0.0)
            .partial_cmp(&b.avg_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for tag in qualitative {
        tag_block(&mut section, tag);
    }
    section
}

fn strategy(selected: &[SelectedSolution], features: &LocalFeatures, ctx: &StageContext<'_>) -> PipelineResult<Section> {
    let mut section = Section::new("strategy", "Growth Strategy and Proposals");
    if selected.is_empty() {
        section.paragraph("No catalog initiative matched the company's weak areas.");
        return Ok(section);
    }
    for solution in selected {
        section.heading(format!("{}. {}", solution.priority, solution.name));
        section.paragraph(solution.issue_fit.clone());
        section.paragraph(solution.expected_impact.clone());
        if !solution.addressed_weaknesses.is_empty() {
            section.paragraph(format!("Addresses: {}", solution.addressed_weaknesses.join(", ")));
        }
    }

    section.heading("Why it works for this company");
    for solution in selected {
        section.paragraph(solution.regional_fit.clone());
        section.paragraph(solution.industry_fit.clone());
    }
    let catalog = load_catalog(ctx.sources.catalog.as_deref())?;
    let rows = selected
        .iter()
        .flat_map(|solution| case_examples(&catalog, &solution.name))
        .map(|example| {
            vec![
                example.company.clone(),
                example.securities_code.clone(),
                example.description.clone(),
            ]
        })
        .collect::<Vec<_>>();
    if !rows.is_empty() {
        section
            .heading("Comparable cases")
            .table(&["Company", "Code", "What they did"], rows);
    }
    let (strengths, constraints) = strengths_and_constraints(&features.overall);
    if !strengths.is_empty() {
        section.heading("Company-specific strengths").bullets(strengths);
    }
    if !constraints.is_empty() {
        section.heading("Company-specific constraints").bullets(constraints);
    }
    Ok(section)
}

fn impact(estimate: Option<&ImpactEstimate>) -> Section {
    let mut section = Section::new("impact", "Estimated Impact");
    let Some(estimate) = estimate else {
        section.paragraph("No initiative was selected, so no impact was estimated.");
        return section;
    };
    section
        .heading("Assumptions")
        .bullets(estimate.assumptions.clone())
        .paragraph(estimate.conservativeness_note.clone());
    let q = &estimate.quantitative_impact;
    let rows = [
        ("Revenue", &q.revenue),
        ("Profit margin", &q.profit_margin),
        ("Cash flow", &q.cash_flow),
    ]
    .into_iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .map(|(label, value)| vec![label.to_string(), value.clone()])
    .collect();
    section
        .heading("Quantitative impact")
        .table(&["Metric", "Estimate"], rows)
        .paragraph(q.calculation_notes.clone())
        .heading("Qualitative impact")
        .bullets(estimate.qualitative_impact.effects.clone())
        .paragraph(estimate.qualitative_impact.narrative.clone());
    section
}

fn phase(section: &mut Section, title: &str, phase: &Phase) {
    section
        .heading(title)
        .bullets(phase.actions.clone())
        .paragraph(if phase.ideal_state.is_empty() {
            String::new()
        } else {
            format!("Target state: {}", phase.ideal_state)
        });
}

fn roadmap(phases: Option<&Phases>) -> Section {
    let mut section = Section::new("roadmap", "Execution Roadmap");
    match phases {
        Some(phases) => {
            phase(&mut section, "Short term (0-1 year)", &phases.short_term);
            phase(&mut section, "Mid term (1-3 years)", &phases.mid_term);
            phase(&mut section, "Long term (3+ years)", &phases.long_term);
        }
        None => {
            section.paragraph("No roadmap was drawn up.");
        }
    }
    section
}

fn risks(risks: &[Risk]) -> Section {
    let mut section = Section::new("risks", "Risks and Responses");
    if risks.is_empty() {
        section.paragraph("No risks were reviewed.");
        return section;
    }
    let rows = risks
        .iter()
        .map(|risk| {
            vec![
                risk.risk_type.clone(),
                risk.risk.clone(),
                risk.mitigation.clone(),
                risk.trigger_or_signal.clone(),
            ]
        })
        .collect();
    section.table(&["Type", "Risk", "Response", "Early warning"], rows);
    section
}

/// Build the report document from the upstream artifacts.
pub fn assemble(ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<ReportDocument> {
    let report: TaggedReport = read(inputs, &REPORT_TAGGED)?;
    let scores: ReportScores = read(inputs, &REPORT_SCORES)?;
    let features: LocalFeatures = read(inputs, &LOCAL_FEATURES)?;
    let selection: SolutionSelection = read(inputs, &SOLUTION_SELECTION)?;
    let plan: RoadmapPlan = read(inputs, &ROADMAP)?;
    let summary: ExecutiveSummary = read(inputs, &EXECUTIVE_SUMMARY)?;

    let mut sections = Vec::new();
    let mut executive = Section::new(&summary.id, &summary.title);
    executive.paragraph(summary.content.clone());
    sections.push(executive);
    sections.push(company_overview(&report, &features));
    if let Some(outlook) = load_outlook(ctx.sources.outlook.as_deref())? {
        let mut industry = Section::new("industry_environment", "Industry Environment");
        markdown_section(&mut industry, &outlook);
        sections.push(industry);
    }
    sections.push(analysis(&report, &scores, &selection));
    let selected: Vec<SelectedSolution> = selection
        .selected_solutions
        .iter()
        .take(MAX_INITIATIVES)
        .cloned()
        .collect();
    sections.push(strategy(&selected, &features, ctx)?);
    sections.push(impact(plan.impact.as_ref()));
    sections.push(roadmap(plan.roadmap.as_ref()));
    sections.push(risks(&plan.risks));

    Ok(ReportDocument {
        meta: DocumentMeta {
            company_code: report.company_code.clone(),
            document: report.document.clone(),
            language: "en".to_string(),
            title: format!("Management Report: Company {}", report.company_code),
        },
        sections,
    })
}

pub struct Assembly;

impl Stage for Assembly {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let document = assemble(ctx, inputs)?;
        tracing::info!(sections = document.sections.len(), "report assembled");
        let value = serde_json::to_value(&document)
            .map_err(|err| PipelineError::json("serialize final_report", err))?;
        Ok(StageOutputs::new().with_json(FINAL_REPORT, value))
    }
}

#[cfg(test)]
#[path = "assembly_tests.rs"]
mod tests;
