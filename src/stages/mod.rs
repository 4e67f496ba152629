//! The report chain: seven stages from source document to DOCX.
//!
//! | # | stage | reads | writes |
//! |---|---|---|---|
//! | 1 | extraction | source files | `report_tagged` |
//! | 2 | scoring | `report_tagged` | `report_scores`, `local_features` |
//! | 3 | selection | scores, features | `solution_selection` |
//! | 4 | roadmap | selection, `report_tagged` | `roadmap` |
//! | 5 | summary | features, scores, selection, roadmap | `executive_summary` |
//! | 6 | assembly | every JSON artifact | `final_report` |
//! | 7 | rendering | `final_report` | `report` (DOCX) |

pub mod assembly;
pub mod catalog;
pub mod context;
pub mod document;
pub mod extraction;
pub mod financials;
pub mod prompts;
pub mod rendering;
pub mod roadmap;
pub mod scoring;
pub mod selection;
pub mod sources;
pub mod summary;
pub mod taxonomy;

#[cfg(test)]
pub(crate) mod testing;

pub use context::StageContext;
pub use sources::SourceSet;

use crate::error::PipelineResult;
use crate::pipeline::Pipeline;
use crate::run::ArtifactSpec;
use serde_json::Value;

pub const REPORT_TAGGED: ArtifactSpec = ArtifactSpec::json("report_tagged");
pub const REPORT_SCORES: ArtifactSpec = ArtifactSpec::json("report_scores");
pub const LOCAL_FEATURES: ArtifactSpec = ArtifactSpec::json("local_features");
pub const SOLUTION_SELECTION: ArtifactSpec = ArtifactSpec::json("solution_selection");
pub const ROADMAP: ArtifactSpec = ArtifactSpec::json("roadmap");
pub const EXECUTIVE_SUMMARY: ArtifactSpec = ArtifactSpec::json("executive_summary");
pub const FINAL_REPORT: ArtifactSpec = ArtifactSpec::json("final_report");
pub const REPORT_DOCUMENT: ArtifactSpec = ArtifactSpec::docx("report");

/// The full seven-stage chain.
pub fn default_pipeline() -> PipelineResult<Pipeline> {
    Pipeline::new(vec![
        Box::new(extraction::Extraction),
        Box::new(scoring::Scoring),
        Box::new(selection::Selection),
        Box::new(roadmap::Roadmap),
        Box::new(summary::Summary),
        Box::new(assembly::Assembly),
        Box::new(rendering::Rendering::default()),
    ])
}

/// String field of a JSON object, or `""`.
pub(crate) fn str_field<'v>(value: &'v Value, key: &str) -> &'v str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Array field of a JSON object, or an empty slice.
pub(crate) fn array_field<'v>(value: &'v Value, key: &str) -> &'v [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
