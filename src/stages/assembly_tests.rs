use super::*;
use crate::config::PipelineConfig;
use crate::llm::LlmClient;
use crate::run::ArtifactData;
use crate::stages::document::Block;
use crate::stages::roadmap::QuantitativeImpact;
use crate::stages::scoring::ItemScore;
use crate::stages::selection::TagAverage;
use crate::stages::sources::SourceSet;
use crate::stages::testing::ScriptedTransport;
use serde_json::json;
use std::fs;

fn tagged_report() -> serde_json::Value {
    json!({
        "document": "report_1234.pdf",
        "company_code": "1234",
        "page_count": 1,
        "pages": [{"page": 1, "sections": [{"tag": "business_sales", "text": "Orders."}]}],
        "financials": {
            "company": {"code": "1234", "location": "Ibaraki", "industry": "Construction"},
            "years": [{"year": 2024, "statement": {}, "indices": {"operating_margin": 3.05}}]
        }
    })
}

fn inputs(selected: Vec<SelectedSolution>, plan: RoadmapPlan) -> StageInputs {
    let scores = ReportScores {
        document: "report_1234.pdf".to_string(),
        company_code: "1234".to_string(),
        scores: vec![
            TagScore {
                tag: "business_sales".to_string(),
                label: "Business, sales and order strategy".to_string(),
                items: vec![ItemScore {
                    item: "Portfolio: Is the role clear?".to_string(),
                    score: Some(2),
                    rationale: "thin".to_string(),
                }],
                summary: "Order policy is vague.".to_string(),
                avg_score: Some(2.0),
            },
            TagScore {
                tag: FINANCE_TAG.to_string(),
                label: "Finance".to_string(),
                items: Vec::new(),
                summary: String::new(),
                avg_score: None,
            },
        ],
    };
    let features = LocalFeatures {
        overall: "Its strength is a dense public-works network. Labour shortage is a key issue. \
                  Margins are 3.05% in FY2024."
            .to_string(),
        ..LocalFeatures::default()
    };
    let selection = SolutionSelection {
        company_code: "1234".to_string(),
        document: "report_1234.pdf".to_string(),
        tag_averages: vec![TagAverage {
            tag: "business_sales".to_string(),
            label: "Business, sales and order strategy".to_string(),
            avg_score: 2.0,
        }],
        weak_tags: Vec::new(),
        low_score_items: Vec::new(),
        candidates: Vec::new(),
        selected_solutions: selected,
    };
    let mut inputs = StageInputs::default();
    inputs.insert(&REPORT_TAGGED, tagged_report());
    inputs.insert(&REPORT_SCORES, serde_json::to_value(&scores).expect("scores"));
    inputs.insert(&LOCAL_FEATURES, serde_json::to_value(&features).expect("features"));
    inputs.insert(&SOLUTION_SELECTION, serde_json::to_value(&selection).expect("selection"));
    inputs.insert(&ROADMAP, serde_json::to_value(&plan).expect("roadmap"));
    inputs.insert(
        &EXECUTIVE_SUMMARY,
        serde_json::to_value(ExecutiveSummary::new("Short summary.")).expect("summary"),
    );
    inputs
}

fn section<'d>(doc: &'d ReportDocument, id: &str) -> &'d Section {
    doc.sections
        .iter()
        .find(|section| section.id == id)
        .unwrap_or_else(|| panic!("section {id} missing"))
}

fn has_text(section: &Section, needle: &str) -> bool {
    section.blocks.iter().any(|block| match block {
        Block::Heading { text } | Block::Paragraph { text } => text.contains(needle),
        Block::Bullets { items } => items.iter().any(|item| item.contains(needle)),
        Block::Table { rows, .. } => rows.iter().flatten().any(|cell| cell.contains(needle)),
    })
}

#[test]
fn strengths_and_constraints_split() {
    let (strengths, constraints) = strengths_and_constraints(
        "Strong local ties are a clear strength. Ageing staff is a risk. Revenue was 1.2bn. \
         The weak balance sheet limits the potential upside.",
    );
    assert_eq!(
        strengths,
        vec![
            "Strong local ties are a clear strength",
            "The weak balance sheet limits the potential upside"
        ]
    );
    assert_eq!(constraints, vec!["Ageing staff is a risk"]);
}

#[test]
fn markdown_section_blocks() {
    let mut section = Section::new("industry_environment", "Industry Environment");
    markdown_section(
        &mut section,
        "# Outlook\nDemand holds\nthrough 2030.\n\n- public works\n- repair demand\n## Risks\ntext",
    );
    assert_eq!(
        section.blocks,
        vec![
            Block::Heading { text: "Outlook".to_string() },
            Block::Paragraph { text: "Demand holds through 2030.".to_string() },
            Block::Bullets {
                items: vec!["public works".to_string(), "repair demand".to_string()]
            },
            Block::Heading { text: "Risks".to_string() },
            Block::Paragraph { text: "text".to_string() },
        ]
    );
}

#[test]
fn empty_selection_renders_placeholders() {
    let config = PipelineConfig::default();
    let sources = SourceSet::default();
    let client = LlmClient::new(Box::new(ScriptedTransport::new()));
    let ctx = StageContext::new(&config, &sources, &client);
    let doc = assemble(&ctx, &inputs(Vec::new(), RoadmapPlan::default())).expect("assemble");

    let ids: Vec<&str> = doc.sections.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["executive_summary", "company_overview", "analysis", "strategy", "impact", "roadmap", "risks"]
    );
    assert_eq!(doc.meta.language, "en");
    assert!(has_text(section(&doc, "strategy"), "No catalog initiative"));
    assert!(has_text(section(&doc, "impact"), "no impact was estimated"));
    assert!(has_text(section(&doc, "company_overview"), "Ibaraki"));
    assert!(has_text(section(&doc, "analysis"), "operating margin"));
    assert!(has_text(section(&doc, "analysis"), "Portfolio"));
}

#[test]
fn full_report_with_catalog_and_outlook() {
    let dir = tempfile::tempdir().expect("tempdir");
    let catalog = dir.path().join("solutions.json");
    fs::write(
        &catalog,
        r#"{"Shared site DX platform": {"case_examples": [
            {"company": "Example Kensetsu", "securities_code": 1801, "description": "Pooled drones."}]}}"#,
    )
    .expect("write catalog");
    let outlook = dir.path().join("outlook.md");
    fs::write(&outlook, "## Summary\nRepair demand grows.\n").expect("write outlook");

    let config = PipelineConfig::default();
    let sources = SourceSet {
        catalog: Some(catalog),
        outlook: Some(outlook),
        ..SourceSet::default()
    };
    let client = LlmClient::new(Box::new(ScriptedTransport::new()));
    let ctx = StageContext::new(&config, &sources, &client);

    let selected = vec![SelectedSolution {
        name: "Shared site DX".to_string(),
        priority: 1,
        regional_fit: "Labour is scarce locally.".to_string(),
        ..SelectedSolution::default()
    }];
    let plan = RoadmapPlan {
        impact: Some(ImpactEstimate {
            quantitative_impact: QuantitativeImpact {
                profit_margin: "3.05% -> 4.0-5.0%".to_string(),
                ..QuantitativeImpact::default()
            },
            ..ImpactEstimate::default()
        }),
        roadmap: Some(Phases {
            short_term: Phase {
                actions: vec!["Pilot on two sites".to_string()],
                ideal_state: "Tools in daily use".to_string(),
            },
            ..Phases::default()
        }),
        risks: vec![Risk {
            risk_type: "execution".to_string(),
            risk: "Low adoption".to_string(),
            ..Risk::default()
        }],
        ..RoadmapPlan::default()
    };

    let outputs = Assembly.execute(&ctx, &inputs(selected, plan)).expect("execute");
    let Some(ArtifactData::Json(value)) = outputs.get(&FINAL_REPORT) else {
        panic!("final report missing");
    };
    let doc: ReportDocument = serde_json::from_value(value.clone()).expect("document");
    assert_eq!(doc.sections[2].id, "industry_environment");
    let strategy = section(&doc, "strategy");
    assert!(has_text(strategy, "1. Shared site DX"));
    assert!(has_text(strategy, "1801"));
    assert!(has_text(strategy, "dense public-works network"));
    assert!(has_text(strategy, "Labour shortage is a key issue"));
    assert!(has_text(section(&doc, "impact"), "4.0-5.0%"));
    assert!(has_text(section(&doc, "roadmap"), "Target state: Tools in daily use"));
    assert!(has_text(section(&doc, "risks"), "Low adoption"));
}
