//! Plain-text extraction from uploaded resume documents.

pub mod handlers;

use serde::Serialize;
use thiserror::Error;

pub const MIN_WORDS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Doc,
    PlainText,
}

impl DocumentFormat {
    /// Maps a MIME type (parameters such as `charset` ignored) onto an accepted format.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::Docx)
            }
            "application/msword" => Some(DocumentFormat::Doc),
            "text/plain" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("file is empty")]
    Empty,

    #[error("file is {actual} bytes, the limit is {limit}")]
    TooLarge { limit: usize, actual: usize },

    #[error("content type '{0}' is not accepted")]
    UnsupportedType(String),

    #[error("{0:?} documents cannot be read by this extractor")]
    UnsupportedFormat(DocumentFormat),

    #[error("PDF could not be read; it may be corrupted or password protected")]
    Corrupted(String),

    #[error("text file is not valid UTF-8")]
    InvalidEncoding,

    #[error("document has {actual} words, at least {min} are required")]
    TooSparse { min: usize, actual: usize },
}

impl ExtractionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::Empty => "empty_file",
            ExtractionError::TooLarge { .. } => "file_too_large",
            ExtractionError::UnsupportedType(_) => "unsupported_type",
            ExtractionError::UnsupportedFormat(_) => "unsupported_format",
            ExtractionError::Corrupted(_) => "corrupted_or_protected",
            ExtractionError::InvalidEncoding => "invalid_encoding",
            ExtractionError::TooSparse { .. } => "too_sparse",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedDocument {
    pub format: DocumentFormat,
    pub text: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DocumentExtractor {
    max_bytes: usize,
}

impl DocumentExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Blocking: PDF parsing is CPU bound, call from `spawn_blocking`.
    pub fn extract(
        &self,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<ExtractedDocument, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(ExtractionError::TooLarge {
                limit: self.max_bytes,
                actual: bytes.len(),
            });
        }
        let format = DocumentFormat::from_mime(content_type)
            .ok_or_else(|| ExtractionError::UnsupportedType(content_type.to_string()))?;

        let raw = match format {
            DocumentFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractionError::Corrupted(e.to_string()))?,
            DocumentFormat::PlainText => std::str::from_utf8(bytes)
                .map_err(|_| ExtractionError::InvalidEncoding)?
                .to_string(),
            DocumentFormat::Docx | DocumentFormat::Doc => {
                return Err(ExtractionError::UnsupportedFormat(format))
            }
        };

        let text = normalize_whitespace(&raw);
        let word_count = text.split_whitespace().count();
        if word_count < MIN_WORDS {
            return Err(ExtractionError::TooSparse {
                min: MIN_WORDS,
                actual: word_count,
            });
        }

        Ok(ExtractedDocument {
            format,
            text,
            word_count,
        })
    }
}

/// Collapses runs of spaces inside lines and drops blank-line runs longer than one.
fn normalize_whitespace(raw: &str) -> String {
    let mut out = Vec::new();
    let mut blank = false;
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !blank && !out.is_empty() {
                out.push(String::new());
            }
            blank = true;
        } else {
            out.push(line);
            blank = false;
        }
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}
