//! Stage 7: render the report document to DOCX.
use super::document::{Block, ReportDocument, Section};
use super::{StageContext, FINAL_REPORT, REPORT_DOCUMENT};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{Stage, StageDescriptor, StageInputs, StageOutputs};
use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use std::io::Cursor;

pub const DESCRIPTOR: StageDescriptor = StageDescriptor {
    name: "rendering",
    ordinal: 7,
    inputs: &[FINAL_REPORT],
    outputs: &[REPORT_DOCUMENT],
};

/// Turns a [`ReportDocument`] into the bytes of one output file.
pub trait DocumentRenderer {
    fn render(&self, document: &ReportDocument) -> PipelineResult<Vec<u8>>;
}

/// DOCX built from direct run formatting, without a style sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxRenderer;

// Half-points.
const TITLE_SIZE: usize = 36;
const SECTION_SIZE: usize = 28;
const HEADING_SIZE: usize = 24;

fn text_paragraph(text: &str) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(text))
}

fn bold_paragraph(text: &str, size: usize) -> Paragraph {
    Paragraph::new().add_run(Run::new().add_text(text).bold().size(size))
}

fn cell(text: &str, bold: bool) -> TableCell {
    let run = Run::new().add_text(text);
    let run = if bold { run.bold() } else { run };
    TableCell::new().add_paragraph(Paragraph::new().add_run(run))
}

fn table(header: &[String], rows: &[Vec<String>]) -> Table {
    let mut table_rows = Vec::with_capacity(rows.len() + 1);
    table_rows.push(TableRow::new(header.iter().map(|h| cell(h, true)).collect()));
    for row in rows {
        // Ragged rows are padded to the header width.
        let mut cells: Vec<TableCell> = row.iter().map(|value| cell(value, false)).collect();
        while cells.len() < header.len() {
            cells.push(cell("", false));
        }
        table_rows.push(TableRow::new(cells));
    }
    Table::new(table_rows)
}

fn add_section(mut docx: Docx, section: &Section) -> Docx {
    docx = docx.add_paragraph(bold_paragraph(&section.title, SECTION_SIZE));
    for block in &section.blocks {
        docx = match block {
            Block::Heading { text } => docx.add_paragraph(bold_paragraph(text, HEADING_SIZE)),
            Block::Paragraph { text } => docx.add_paragraph(text_paragraph(text)),
            Block::Bullets { items } => items
                .iter()
                .fold(docx, |docx, item| docx.add_paragraph(text_paragraph(&format!("• {item}")))),
            Block::Table { header, rows } => docx.add_table(table(header, rows)).add_paragraph(Paragraph::new()),
        };
    }
    docx
}

impl DocumentRenderer for DocxRenderer {
    fn render(&self, document: &ReportDocument) -> PipelineResult<Vec<u8>> {
        let mut docx = Docx::new().add_paragraph(bold_paragraph(&document.meta.title, TITLE_SIZE));
        docx = docx.add_paragraph(text_paragraph(&format!("Source: {}", document.meta.document)));
        for section in &document.sections {
            docx = add_section(docx, section);
        }
        let mut out = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut out)
            .map_err(|err| PipelineError::Render(err.to_string()))?;
        Ok(out.into_inner())
    }
}

pub struct Rendering {
    renderer: Box<dyn DocumentRenderer>,
}

impl Rendering {
    pub fn new(renderer: Box<dyn DocumentRenderer>) -> Self {
        Self { renderer }
    }
}

impl Default for Rendering {
    fn default() -> Self {
        Self::new(Box::new(DocxRenderer))
    }
}

impl Stage for Rendering {
    fn descriptor(&self) -> &StageDescriptor {
        &DESCRIPTOR
    }

    fn execute(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> PipelineResult<StageOutputs> {
        let document: ReportDocument = serde_json::from_value(inputs.get(&FINAL_REPORT)?.clone())
            .map_err(|err| PipelineError::json("read final_report", err))?;
        let bytes = self.renderer.render(&document)?;
        tracing::info!(bytes = bytes.len(), "report rendered");
        Ok(StageOutputs::new().with_binary(REPORT_DOCUMENT, bytes))
    }
}
