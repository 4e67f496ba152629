//! Source documents: paginated text from a PDF or a plain-text export.
//!
//! PDFs are read page by page. Text exports separate pages with form feeds;
//! text without any form feed is cut into pseudo-pages on line boundaries so
//! prompts stay bounded. A leading sample-data banner is removed from each
//! page.
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FORM_FEED: char = '\u{000C}';
const PSEUDO_PAGE_CHARS: usize = 3000;
const SAMPLE_BANNER: &str = "架空・サンプルデータ";

/// Paths to the source files of a run.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    pub company_code: String,
    pub document: Option<PathBuf>,
    pub csv: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub outlook: Option<PathBuf>,
}

impl SourceSet {
    pub fn require_document(&self) -> PipelineResult<&Path> {
        self.document
            .as_deref()
            .ok_or_else(|| PipelineError::InvalidInput("no source document for this run".to_string()))
    }

    /// File name of the source document, for artifacts.
    pub fn document_name(&self) -> String {
        self.document
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: usize,
    pub text: String,
}

/// Turns a document into pages.
pub trait PageSource {
    fn pages(&self, path: &Path) -> PipelineResult<Vec<Page>>;
}

/// PDF text via `pdf-extract`.
#[derive(Debug, Default)]
pub struct PdfPages;

impl PageSource for PdfPages {
    fn pages(&self, path: &Path) -> PipelineResult<Vec<Page>> {
        let owned = path.to_path_buf();
        // pdf-extract can panic on malformed PDFs
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_by_pages(&owned)
        }));
        let texts = match result {
            Ok(Ok(texts)) => texts,
            Ok(Err(err)) => {
                return Err(PipelineError::InvalidInput(format!(
                    "extract text from {}: {err}",
                    path.display()
                )))
            }
            Err(_) => {
                return Err(PipelineError::InvalidInput(format!(
                    "PDF extraction panicked on {}",
                    path.display()
                )))
            }
        };
        tracing::debug!(pages = texts.len(), "pdf text extracted");
        Ok(number_pages(texts))
    }
}

/// UTF-8 text with form-feed page breaks.
#[derive(Debug, Default)]
pub struct TextPages;

impl PageSource for TextPages {
    fn pages(&self, path: &Path) -> PipelineResult<Vec<Page>> {
        let bytes = fs::read(path)
            .map_err(|err| PipelineError::io(format!("read {}", path.display()), err))?;
        Ok(paginate(&String::from_utf8_lossy(&bytes)))
    }
}

/// Pick a page source by file extension.
pub fn page_source_for(path: &Path) -> Box<dyn PageSource> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        Box::new(PdfPages)
    } else {
        Box::new(TextPages)
    }
}

pub fn load_pages(path: &Path) -> PipelineResult<Vec<Page>> {
    if !path.is_file() {
        return Err(PipelineError::InvalidInput(format!(
            "source document {} does not exist",
            path.display()
        )));
    }
    let pages = page_source_for(path).pages(path)?;
    if pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(PipelineError::InvalidInput(format!(
            "no text could be extracted from {}",
            path.display()
        )));
    }
    Ok(pages)
}

/// Split extracted text into numbered pages.
pub fn paginate(text: &str) -> Vec<Page> {
    let chunks: Vec<String> = if text.contains(FORM_FEED) {
        let mut parts: Vec<&str> = text.split(FORM_FEED).collect();
        if parts.len() > 1 && parts.last().is_some_and(|last| last.trim().is_empty()) {
            parts.pop();
        }
        parts.into_iter().map(str::to_string).collect()
    } else {
        chunk_lines(text, PSEUDO_PAGE_CHARS)
    };
    number_pages(chunks)
}

/// One page per text, numbered from 1, without the sample-data banner.
pub fn number_pages(texts: Vec<String>) -> Vec<Page> {
    texts
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Page {
            page: idx + 1,
            text: strip_banner(&text).trim().to_string(),
        })
        .collect()
}

/// Drop the banner line that sample disclosures print at the top of every page.
fn strip_banner(text: &str) -> &str {
    let body = text.trim_start();
    match body.strip_prefix(SAMPLE_BANNER) {
        Some(rest) => rest.strip_prefix('\n').unwrap_or(rest),
        None => text,
    }
}

fn chunk_lines(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for line in text.lines() {
        let line_chars = line.chars().count() + 1;
        if current_chars > 0 && current_chars + line_chars > max_chars {
            chunks.push(current.trim().to_string());
            current.clear();
            current_chars = 0;
        }
        current.push_str(line);
        current.push('\n');
        current_chars += line_chars;
    }
    if !current.trim().is_empty() || chunks.is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_feeds_split_pages() {
        let pages = paginate("cover\u{000C}business\n overview\u{000C}risks\u{000C}");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], Page { page: 1, text: "cover".to_string() });
        assert_eq!(pages[1].text, "business\n overview");
        assert_eq!(pages[2].page, 3);
    }

    #[test]
    fn pdf_page_texts_keep_their_numbers_and_lose_the_banner() {
        let pages = number_pages(vec![
            "架空・サンプルデータ\n有価証券報告書".to_string(),
            "\n架空・サンプルデータ事業の状況\n".to_string(),
            String::new(),
            "Risks".to_string(),
        ]);
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0], Page { page: 1, text: "有価証券報告書".to_string() });
        assert_eq!(pages[1].text, "事業の状況");
        assert_eq!(pages[2].text, "");
        assert_eq!(pages[3], Page { page: 4, text: "Risks".to_string() });
    }

    #[test]
    fn text_without_form_feeds_is_chunked_on_lines() {
        let line = "x".repeat(1000);
        let text = format!("{line}\n{line}\n{line}\n{line}\n");
        let pages = paginate(&text);
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|page| page.text.chars().count() <= PSEUDO_PAGE_CHARS));
    }

    #[test]
    fn text_source_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report_1234.txt");
        fs::write(&path, "one\u{000C}two").expect("write");
        let pages = load_pages(&path).expect("pages");
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn missing_or_empty_document_is_invalid_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_pages(&dir.path().join("absent.txt")).is_err());
        let blank = dir.path().join("blank.txt");
        fs::write(&blank, "  \u{000C}  ").expect("write");
        assert!(matches!(load_pages(&blank), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn document_name_is_file_name_only() {
        let sources = SourceSet {
            document: Some(PathBuf::from("/in/reports/report_1234.pdf")),
            ..SourceSet::default()
        };
        assert_eq!(sources.document_name(), "report_1234.pdf");
    }
}
