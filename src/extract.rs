//! Plain-text extraction for reference files.
//!
//! The reference loader hands over a path; this module picks an extractor
//! from the file extension and returns UTF-8 text.
//!
//! | Extension | Extractor |
//! |-----------|-----------|
//! | `pdf` | `pdf-extract` |
//! | `docx` | `zip` + `quick-xml`, concatenating `<w:t>` runs |
//! | `txt`, `md`, `json`, `tf` | read as UTF-8 (lossy) |
//!
//! Extraction never panics: every failure is an [`ExtractError`] and the
//! caller decides whether to skip the file.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const PLAIN_EXTENSIONS: [&str; 4] = ["txt", "md", "json", "tf"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// True when [`extract_file`] knows how to read this extension.
pub fn is_supported(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("pdf" | "docx" | "txt" | "md" | "json" | "tf")
    )
}

/// Extract text from a file on disk. Blocking; call from `spawn_blocking`.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let ext = extension(path).unwrap_or_default();
    if !is_supported(path) {
        return Err(ExtractError::Unsupported(if ext.is_empty() {
            path.display().to_string()
        } else {
            ext
        }));
    }

    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match ext.as_str() {
        "pdf" => extract_pdf(&bytes),
        "docx" => extract_docx(&bytes),
        e if PLAIN_EXTENSIONS.contains(&e) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_text_runs(&doc_xml)
}

/// Concatenate `<w:t>` runs; each closing `<w:p>` becomes a newline.
fn extract_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
