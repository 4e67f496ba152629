//! Prompt templates and few-shot exemplars.
//!
//! Templates live under `prompts/` and are compiled in. Placeholders are
//! `{name}`; [`render`] fills them in one pass. Each template has an
//! `{exemplar}` slot that receives the exemplar block for its key, or
//! nothing when exemplars are disabled.
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::fs;

pub const TAGGING: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/tagging.md"));
pub const SCORING: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/scoring.md"));
pub const LOCAL_FEATURE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/local_feature.md"
));
pub const OVERALL_FEATURE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/overall_feature.md"
));
pub const SELECTION: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/selection.md"));
pub const IMPACT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/impact.md"));
pub const ROADMAP: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/roadmap.md"));
pub const RISKS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/risks.md"));
pub const EXECUTIVE_SUMMARY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/executive_summary.md"
));

/// One exemplar per prompt key: an input excerpt followed by the expected JSON.
const BUILTIN_EXEMPLARS: &[(&str, &str)] = &[
    (
        "tagging",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/tagging.md")),
    ),
    (
        "scoring",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/scoring.md")),
    ),
    (
        "local_feature",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/local_feature.md")),
    ),
    (
        "overall_feature",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/overall_feature.md")),
    ),
    (
        "selection",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/selection.md")),
    ),
    (
        "impact",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/impact.md")),
    ),
    (
        "roadmap",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/roadmap.md")),
    ),
    (
        "risks",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/risks.md")),
    ),
    (
        "executive_summary",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/fewshot/executive_summary.md")),
    ),
];

/// Exemplar text by prompt key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exemplars {
    entries: BTreeMap<String, String>,
}

impl Exemplars {
    pub fn builtin(enabled: bool) -> Self {
        if !enabled {
            return Self::default();
        }
        Self {
            entries: BUILTIN_EXEMPLARS
                .iter()
                .map(|(key, text)| (key.to_string(), text.trim().to_string()))
                .collect(),
        }
    }

    /// Built-in exemplars with `--fewshot-file` entries merged over them.
    pub fn load(config: &PipelineConfig) -> PipelineResult<Self> {
        let mut exemplars = Self::builtin(config.fewshot);
        if !config.fewshot {
            return Ok(exemplars);
        }
        let Some(path) = &config.fewshot_file else {
            return Ok(exemplars);
        };
        let bytes = fs::read(path)
            .map_err(|err| PipelineError::InvalidInput(format!("read {}: {err}", path.display())))?;
        let extra: BTreeMap<String, String> = serde_json::from_slice(&bytes).map_err(|err| {
            PipelineError::InvalidInput(format!(
                "{} must be a JSON object of prompt key to exemplar text: {err}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), entries = extra.len(), "exemplars merged");
        exemplars.entries.extend(extra);
        Ok(exemplars)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// The block substituted for `{exemplar}`.
    pub fn block(&self, key: &str) -> String {
        match self.get(key) {
            Some(text) if !text.trim().is_empty() => format!("\nExample:\n{}\n", text.trim()),
            _ => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace `{name}` placeholders in a single pass.
///
/// Substituted values are not rescanned, so braces inside document text or
/// JSON examples survive. Unknown placeholders are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let closes = after[name_len..].starts_with('}');
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) if closes && !name.is_empty() => {
                out.push_str(value);
                rest = &after[name_len + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_known_placeholders_once() {
        let out = render(
            "Tag {tag}: {text} {unknown} {\"json\": 1}",
            &[("tag", "finance"), ("text", "{tag} stays")],
        );
        assert_eq!(out, "Tag finance: {tag} stays {unknown} {\"json\": 1}");
    }

    #[test]
    fn templates_start_with_task_marker() {
        for template in [
            TAGGING,
            SCORING,
            LOCAL_FEATURE,
            OVERALL_FEATURE,
            SELECTION,
            IMPACT,
            ROADMAP,
            RISKS,
            EXECUTIVE_SUMMARY,
        ] {
            assert!(template.starts_with("# Task: "), "{template}");
            assert!(template.contains("{exemplar}"));
        }
    }

    #[test]
    fn disabled_exemplars_render_nothing() {
        let exemplars = Exemplars::builtin(false);
        assert!(exemplars.is_empty());
        assert_eq!(exemplars.block("scoring"), "");
        assert!(Exemplars::builtin(true).get("scoring").is_some());
    }

    #[test]
    fn every_prompt_key_has_a_builtin_exemplar() {
        let exemplars = Exemplars::builtin(true);
        for key in [
            "tagging",
            "scoring",
            "local_feature",
            "overall_feature",
            "selection",
            "impact",
            "roadmap",
            "risks",
            "executive_summary",
        ] {
            let text = exemplars.get(key).unwrap_or_else(|| panic!("no exemplar for {key}"));
            assert!(text.lines().count() > 3, "{key} exemplar is a one-liner");
            let (excerpt, output) = text.split_once("Output:").expect("input and output parts");
            assert!(excerpt.starts_with("Input excerpt"), "{key}");
            let parsed: serde_json::Value = serde_json::from_str(output.trim())
                .unwrap_or_else(|err| panic!("{key} exemplar output is not JSON: {err}"));
            assert!(parsed.is_object(), "{key}");
            assert!(exemplars.block(key).starts_with("\nExample:\n"));
        }
    }

    #[test]
    fn fewshot_file_overrides_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("extra.json");
        fs::write(&path, r#"{"scoring": "custom", "roadmap": "phases"}"#).expect("write");
        let config = PipelineConfig {
            fewshot_file: Some(path),
            ..PipelineConfig::default()
        };
        let exemplars = Exemplars::load(&config).expect("load");
        assert_eq!(exemplars.get("scoring"), Some("custom"));
        assert_eq!(exemplars.get("roadmap"), Some("phases"));
        assert!(exemplars.get("tagging").is_some());
    }

    #[test]
    fn fewshot_file_ignored_when_disabled() {
        let config = PipelineConfig {
            fewshot: false,
            fewshot_file: Some("/does/not/exist.json".into()),
            ..PipelineConfig::default()
        };
        assert!(Exemplars::load(&config).expect("load").is_empty());
    }
}
