//! Text Extractor: converts uploaded documents into normalized plain text.
//!
//! Pure and deterministic: the same bytes and MIME type always yield the same
//! text. PDF parsing is CPU-bound, so the async entry point runs it on the
//! blocking pool.

use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use pulldown_cmark::{Event, Parser, Tag};

use crate::pipeline::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
    Markdown,
}

impl DocumentFormat {
    pub fn from_mime(mime_type: &str) -> Result<Self, PipelineError> {
        match normalize_mime(mime_type).as_str() {
            "application/pdf" | "application/x-pdf" => Ok(DocumentFormat::Pdf),
            "text/plain" => Ok(DocumentFormat::PlainText),
            "text/markdown" | "text/x-markdown" => Ok(DocumentFormat::Markdown),
            other => Err(PipelineError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Best-effort MIME type from a filename, for uploads without a content type.
    pub fn mime_from_filename(filename: &str) -> Option<&'static str> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_lowercase().as_str() {
            "pdf" => Some("application/pdf"),
            "txt" => Some("text/plain"),
            "md" | "markdown" => Some("text/markdown"),
            _ => None,
        }
    }
}

/// Lowercases and strips parameters: `Text/Plain; charset=utf-8` → `text/plain`.
pub fn normalize_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// `extract(document_bytes, mime_type) -> plain_text`.
pub fn extract(bytes: &[u8], mime_type: &str) -> Result<String, PipelineError> {
    let raw = match DocumentFormat::from_mime(mime_type)? {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::PlainText => decode_utf8(bytes)?.to_string(),
        DocumentFormat::Markdown => markdown_to_text(decode_utf8(bytes)?),
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(PipelineError::CorruptDocument(
            "document contains no extractable text".to_string(),
        ));
    }
    Ok(text)
}

/// Runs [`extract`] on the blocking thread pool.
pub async fn extract_blocking(bytes: Bytes, mime_type: String) -> Result<String, PipelineError> {
    tokio::task::spawn_blocking(move || extract(&bytes, &mime_type))
        .await
        .map_err(|e| PipelineError::CorruptDocument(format!("extraction task aborted: {e}")))?
}

fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(PipelineError::CorruptDocument(format!(
            "failed to parse PDF: {e}"
        ))),
        Err(_) => Err(PipelineError::CorruptDocument(
            "PDF parser aborted on malformed input".to_string(),
        )),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<&str, PipelineError> {
    std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::CorruptDocument(format!("document is not valid UTF-8: {e}")))
}

fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(Tag::Paragraph)
            | Event::End(Tag::Heading(..))
            | Event::End(Tag::Item)
            | Event::End(Tag::CodeBlock(_))
            | Event::End(Tag::TableRow) => text.push('\n'),
            Event::End(Tag::TableCell) => text.push('\t'),
            _ => {}
        }
    }
    text
}

/// BOM stripped, newlines unified, trailing whitespace dropped, blank runs
/// collapsed to a single blank line.
fn normalize_text(raw: &str) -> String {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}
