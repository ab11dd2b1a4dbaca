//! Format-aware text extraction.

use crate::processing::ocr::{OcrError, PdfOcr};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

/// Errors raised while extracting content from a document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// File extension is not one of the supported formats.
    #[error("unsupported file extension '{0}'")]
    UnsupportedFormat(String),
    /// File could not be read.
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),
    /// File content does not match its declared format.
    #[error("corrupt {format} document: {message}")]
    Corrupt {
        /// Declared format.
        format: DocumentFormat,
        /// Library error message.
        message: String,
    },
    /// Text file is not valid UTF-8.
    #[error("text document is not valid UTF-8")]
    InvalidUtf8,
    /// JSON is malformed or not an object / list of objects.
    #[error("invalid JSON document: {0}")]
    InvalidJson(String),
    /// PDF has no usable text layer and OCR is disabled.
    #[error("PDF has no extractable text and OCR is disabled")]
    OcrDisabled,
    /// OCR fallback failed.
    #[error("OCR fallback failed: {0}")]
    Ocr(#[from] OcrError),
    /// Blocking extraction task panicked or was cancelled.
    #[error("extraction task failed: {0}")]
    Blocking(String),
}

/// Supported input formats, resolved once from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// Plain UTF-8 text.
    Txt,
    /// JSON object or list of objects.
    Json,
}

impl DocumentFormat {
    /// Resolve the format from a path's extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self, ParseError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            _ => Err(ParseError::UnsupportedFormat(extension)),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pdf => "PDF",
            Self::Docx => "DOCX",
            Self::Txt => "text",
            Self::Json => "JSON",
        };
        f.write_str(name)
    }
}

/// Content pulled out of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// Free text, paragraphs separated by blank lines.
    Text(String),
    /// JSON records kept intact.
    Records(Vec<Map<String, Value>>),
}

/// Result of parsing one document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    /// Format the document was parsed as.
    pub format: DocumentFormat,
    /// Extracted content.
    pub content: Extracted,
    /// Whether the text came from OCR.
    pub ocr_used: bool,
}

/// Extracts text or records from files on local disk.
#[derive(Clone)]
pub struct DocumentParser {
    ocr: Option<PdfOcr>,
    ocr_min_chars: usize,
}

impl DocumentParser {
    /// Build a parser; `ocr` is `None` when the OCR fallback is disabled.
    pub fn new(ocr: Option<PdfOcr>, ocr_min_chars: usize) -> Self {
        Self { ocr, ocr_min_chars }
    }

    /// Extract the content of `path`, resolving the format from its extension.
    pub async fn extract(&self, path: &Path) -> Result<ParsedDocument, ParseError> {
        let format = DocumentFormat::from_path(path)?;
        let bytes = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), %format, bytes = bytes.len(), "Extracting document");

        let (content, ocr_used) = match format {
            DocumentFormat::Pdf => {
                let (text, ocr_used) = self.extract_pdf(bytes).await?;
                (Extracted::Text(text), ocr_used)
            }
            DocumentFormat::Docx => (Extracted::Text(extract_docx(bytes).await?), false),
            DocumentFormat::Txt => (Extracted::Text(extract_txt(bytes)?), false),
            DocumentFormat::Json => (Extracted::Records(extract_json(&bytes)?), false),
        };

        Ok(ParsedDocument {
            format,
            content,
            ocr_used,
        })
    }

    async fn extract_pdf(&self, bytes: Vec<u8>) -> Result<(String, bool), ParseError> {
        let (text, bytes) = tokio::task::spawn_blocking(move || {
            lopdf::Document::load_mem(&bytes).map_err(|err| ParseError::Corrupt {
                format: DocumentFormat::Pdf,
                message: err.to_string(),
            })?;
            let text = match pdf_extract::extract_text_from_mem(&bytes) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "PDF text layer unreadable; treating as empty");
                    String::new()
                }
            };
            Ok::<_, ParseError>((text, bytes))
        })
        .await
        .map_err(|err| ParseError::Blocking(err.to_string()))??;

        if has_usable_text(&text, self.ocr_min_chars) {
            return Ok((text, false));
        }

        let Some(ocr) = &self.ocr else {
            return Err(ParseError::OcrDisabled);
        };
        tracing::info!(
            text_layer_chars = text.len(),
            min_chars = self.ocr_min_chars,
            "PDF text layer below threshold; falling back to OCR"
        );
        let text = ocr.recognize_pdf(&bytes).await?;
        Ok((text, true))
    }
}

/// A text layer is usable when it has more than `min_chars` non-whitespace characters.
pub fn has_usable_text(text: &str, min_chars: usize) -> bool {
    text.chars().filter(|ch| !ch.is_whitespace()).count() > min_chars
}

async fn extract_docx(bytes: Vec<u8>) -> Result<String, ParseError> {
    tokio::task::spawn_blocking(move || {
        let docx = docx_rs::read_docx(&bytes).map_err(|err| ParseError::Corrupt {
            format: DocumentFormat::Docx,
            message: err.to_string(),
        })?;

        let mut paragraphs = Vec::new();
        for child in docx.document.children {
            if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
                let mut line = String::new();
                for child in paragraph.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let docx_rs::RunChild::Text(text) = child {
                                line.push_str(&text.text);
                            }
                        }
                    }
                }
                paragraphs.push(line);
            }
        }
        Ok(paragraphs.join("\n"))
    })
    .await
    .map_err(|err| ParseError::Blocking(err.to_string()))?
}

fn extract_txt(bytes: Vec<u8>) -> Result<String, ParseError> {
    String::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
}

fn extract_json(bytes: &[u8]) -> Result<Vec<Map<String, Value>>, ParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| ParseError::InvalidJson(err.to_string()))?;
    match value {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) if !items.is_empty() => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Value::Object(record) => Ok(record),
                _ => Err(ParseError::InvalidJson(format!(
                    "element {idx} is not an object"
                ))),
            })
            .collect(),
        Value::Array(_) => Err(ParseError::InvalidJson("empty array".into())),
        _ => Err(ParseError::InvalidJson(
            "expected an object or a list of objects".into(),
        )),
    }
}
