//! Initiative catalog and industry outlook inputs.
use crate::error::{PipelineError, PipelineResult};
use crate::util::truncate_chars;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const OUTLOOK_MAX_CHARS: usize = 4000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetCategory {
    pub no: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseExample {
    #[serde(default)]
    pub company: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub securities_code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub target_categories: Vec<TargetCategory>,
    #[serde(default)]
    pub regional_relevance: String,
    #[serde(default)]
    pub case_examples: Vec<CaseExample>,
}

/// Initiatives by name, in name order.
pub type Catalog = BTreeMap<String, Initiative>;

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Load the catalog; no path means an empty catalog.
pub fn load_catalog(path: Option<&Path>) -> PipelineResult<Catalog> {
    let Some(path) = path else {
        return Ok(Catalog::new());
    };
    let bytes = fs::read(path)
        .map_err(|err| PipelineError::InvalidInput(format!("read catalog {}: {err}", path.display())))?;
    let catalog: Catalog = serde_json::from_slice(&bytes)
        .map_err(|err| PipelineError::InvalidInput(format!("catalog {}: {err}", path.display())))?;
    tracing::debug!(initiatives = catalog.len(), "catalog loaded");
    Ok(catalog)
}

/// Case examples for an initiative, matched exactly or by containment.
pub fn case_examples<'c>(catalog: &'c Catalog, name: &str) -> &'c [CaseExample] {
    if let Some(initiative) = catalog.get(name) {
        return &initiative.case_examples;
    }
    catalog
        .iter()
        .find(|(key, _)| !name.is_empty() && (key.contains(name) || name.contains(key.as_str())))
        .map(|(_, initiative)| initiative.case_examples.as_slice())
        .unwrap_or_default()
}

pub fn load_outlook(path: Option<&Path>) -> PipelineResult<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    fs::read_to_string(path)
        .map(Some)
        .map_err(|err| PipelineError::InvalidInput(format!("read outlook {}: {err}", path.display())))
}

/// The summary and implications sections of the outlook, or all of it when
/// it has neither, capped for prompts.
pub fn outlook_digest(outlook: &str) -> String {
    let mut parts = Vec::new();
    let mut current: Option<String> = None;
    for line in outlook.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if let Some(section) = current.take() {
                parts.push(section);
            }
            let lower = title.to_ascii_lowercase();
            if lower.contains("summary") || lower.contains("implication") {
                current = Some(format!("{line}\n"));
            }
            continue;
        }
        if let Some(section) = current.as_mut() {
            section.push_str(line);
            section.push('\n');
        }
    }
    if let Some(section) = current {
        parts.push(section);
    }
    let digest = if parts.is_empty() {
        outlook.trim().to_string()
    } else {
        parts
            .iter()
            .map(|part| part.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    if digest.chars().count() > OUTLOOK_MAX_CHARS {
        format!("{}\n...(truncated)", truncate_chars(&digest, OUTLOOK_MAX_CHARS))
    } else {
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
      "Shared site DX platform": {
        "overview": "Pool ICT tools across regional contractors.",
        "target_categories": [{"no": 3, "name": "productivity_operations"}, {"no": 5}],
        "regional_relevance": "Labour is scarce outside the big cities.",
        "case_examples": [{"company": "Example Kensetsu", "securities_code": 1234, "description": "Shared drones."}]
      },
      "Selective ordering": {"target_categories": [{"no": 2}]}
    }"#;

    #[test]
    fn catalog_parses_numeric_codes_and_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("solutions.json");
        fs::write(&path, CATALOG).expect("write");
        let catalog = load_catalog(Some(&path)).expect("catalog");
        assert_eq!(catalog.len(), 2);
        let dx = &catalog["Shared site DX platform"];
        assert_eq!(dx.case_examples[0].securities_code, "1234");
        assert_eq!(catalog["Selective ordering"].overview, "");
        assert_eq!(case_examples(&catalog, "Shared site DX").len(), 1);
        assert!(case_examples(&catalog, "Unrelated").is_empty());
    }

    #[test]
    fn missing_catalog_path_is_empty_but_bad_file_is_invalid() {
        assert!(load_catalog(None).expect("empty").is_empty());
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "[1, 2]").expect("write");
        assert!(matches!(load_catalog(Some(&path)), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn outlook_digest_prefers_summary_sections() {
        let outlook = "# Outlook\nintro\n## Executive Summary\ndemand holds\n## Data\nnoise\n## Strategic Implications\nconsolidate\n";
        assert_eq!(
            outlook_digest(outlook),
            "## Executive Summary\ndemand holds\n\n## Strategic Implications\nconsolidate"
        );
        assert_eq!(outlook_digest("just text"), "just text");
    }

    #[test]
    fn outlook_digest_is_capped() {
        let digest = outlook_digest(&"x".repeat(OUTLOOK_MAX_CHARS + 10));
        assert!(digest.ends_with("...(truncated)"));
    }
}
