//! Stage 1: paginate the source document, tag each page's sections, and
//! attach the company's financial statements.
use super::financials::{load_financials, Financials};
use super::prompts::{render, TAGGING};
use super::sources::{load_pages, Page};
use super::taxonomy::{self, OTHER_TAG, TAGS};
use super::{StageContext, REPORT_TAGGED};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{Field, Shape};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "extraction",
    ordinal: 1,
    inputs: &[],
    outputs: &[REPORT_TAGGED],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedSection {
    pub tag: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedPage {
    pub page: usize,
    pub sections: Vec<TaggedSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedReport {
    pub document: String,
    pub company_code: String,
    pub page_count: usize,
    pub pages: Vec<TaggedPage>,
    pub financials: Option<Financials>,
}

pub struct Extraction;

impl Stage for Extraction {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, ctx: &StageContext<'_>, _inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let document = ctx.sources.require_document()?;
        let pages = load_pages(document)?;
        tracing::info!(pages = pages.len(), "document paginated");

        let financials = match &ctx.sources.csv {
            Some(csv) => {
                let found = load_financials(csv, &ctx.sources.company_code)?;
                if found.is_none() {
                    tracing::warn!(
                        code = %ctx.sources.company_code,
                        "no financial statements for this company code"
                    );
                }
                found
            }
            None => None,
        };

        let tagged = tag_pages(ctx, &pages)?;
        let report = TaggedReport {
            document: ctx.sources.document_name(),
            company_code: ctx.sources.company_code.clone(),
            page_count: pages.len(),
            pages: tagged,
            financials,
        };
        let value = serde_json::to_value(&report)
            .map_err(|err| PipelineError::json("serialize tagged report", err))?;
        Ok(StageOutputs::new().with_json(REPORT_TAGGED, value))
    }
}

fn tag_list() -> String {
    let mut lines: Vec<String> = TAGS
        .iter()
        .map(|tag| format!("  {}. {}: {} ({})", tag.no, tag.key, tag.label, tag.hint))
        .collect();
    lines.push(format!(
        "  {}. {OTHER_TAG}: cover, contents, audit report and anything not covered above",
        TAGS.len() + 1
    ));
    lines.join("\n")
}

fn pages_block(batch: &[Page]) -> String {
    batch
        .iter()
        .map(|page| {
            let text = if page.text.trim().is_empty() {
                "(blank page)"
            } else {
                page.text.as_str()
            };
            format!("--- page {} ---\n{text}\n", page.page)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn tagging_shape() -> Shape {
    Shape::object([Field::required("pages", Shape::array_of(Shape::Any))])
}

/// Tag pages in batches of `tagging_batch`.
pub fn tag_pages(ctx: &StageContext<'_>, pages: &[Page]) -> PipelineResult<Vec<TaggedPage>> {
    let tags = tag_list();
    let shape = tagging_shape();
    let mut tagged = Vec::with_capacity(pages.len());
    for batch in pages.chunks(ctx.config.tagging_batch.max(1)) {
        let (first, last) = match (batch.first(), batch.last()) {
            (Some(first), Some(last)) => (first.page, last.page),
            _ => continue,
        };
        let exemplar = ctx.exemplars().block("tagging");
        let prompt = render(
            TAGGING,
            &[
                ("tags", tags.as_str()),
                ("pages", pages_block(batch).as_str()),
                ("exemplar", exemplar.as_str()),
            ],
        );
        let label = format!("pages {first}-{last}");
        let reply = ctx.ask_tagging(DESCRIPTOR.name, &label, &prompt, &shape)?;
        let entries = reply.get("pages").and_then(Value::as_array);
        for page in batch {
            let entry = entries.and_then(|entries| find_page(entries, page.page));
            tagged.push(TaggedPage {
                page: page.page,
                sections: normalize_sections(entry, page),
            });
        }
        tracing::debug!(first, last, "batch tagged");
    }
    Ok(tagged)
}

fn find_page(entries: &[Value], number: usize) -> Option<&Value> {
    entries.iter().find(|entry| {
        match entry.get("page") {
            Some(Value::Number(n)) => n.as_u64() == Some(number as u64),
            Some(Value::String(s)) => s.trim().parse::<usize>().ok() == Some(number),
            _ => false,
        }
    })
}

fn other(text: &str) -> TaggedSection {
    TaggedSection {
        tag: OTHER_TAG.to_string(),
        text: text.to_string(),
    }
}

/// Coerce one page entry into tagged sections, falling back to a single
/// `other` section holding the page text.
fn normalize_sections(entry: Option<&Value>, page: &Page) -> Vec<TaggedSection> {
    let fallback = || vec![other(&page.text)];
    let Some(sections) = entry.and_then(|entry| entry.get("sections")) else {
        return fallback();
    };
    let Some(items) = sections.as_array() else {
        return fallback();
    };
    let normalized: Vec<TaggedSection> = items
        .iter()
        .map(|item| match item {
            Value::String(text) => other(text),
            Value::Object(_) => {
                let raw_tag = item
                    .get("tag")
                    .and_then(Value::as_str)
                    .or_else(|| {
                        item.get("tags")
                            .and_then(Value::as_array)
                            .and_then(|tags| tags.first())
                            .and_then(Value::as_str)
                    })
                    .unwrap_or(OTHER_TAG);
                TaggedSection {
                    tag: taxonomy::normalize(raw_tag).to_string(),
                    text: item
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            _ => other(""),
        })
        .collect();
    if normalized.is_empty() {
        fallback()
    } else {
        normalized
    }
}
