//! Plain-text extraction from uploaded documents.
//!
//! The document kind is resolved once from the file extension; each kind has
//! its own reader module. Every parser failure is normalized into
//! [`ExtractError::ExtractionFailed`] so callers never see library error types.
pub mod docx;
pub mod pdf;
pub mod pptx;
pub mod xlsx;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that can occur while extracting text.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Supported document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Word,
    Spreadsheet,
    SlideDeck,
    PlainText,
}

impl DocumentKind {
    /// Resolve the kind from a path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Word),
            "xlsx" => Ok(Self::Spreadsheet),
            "pptx" => Ok(Self::SlideDeck),
            "txt" => Ok(Self::PlainText),
            _ => Err(ExtractError::UnsupportedFormat(format!(".{ext}"))),
        }
    }

    #[must_use]
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Word => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Spreadsheet => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::SlideDeck => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Self::PlainText => "text/plain",
        }
    }
}

/// A successfully extracted document. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_path: PathBuf,
    pub media_type: &'static str,
    pub raw_text: String,
}

/// Whether the extension of `path` is one we can read.
#[must_use]
pub fn is_supported(path: &Path) -> bool {
    DocumentKind::from_path(path).is_ok()
}

/// Extract plain text from the file at `path`.
///
/// Unsupported extensions fail before the file is touched.
pub fn extract_text<P: AsRef<Path>>(path: P) -> Result<String, ExtractError> {
    let path = path.as_ref();
    let kind = match DocumentKind::from_path(path) {
        Ok(kind) => kind,
        Err(e) => {
            warn!("Unsupported file type: {}", path.display());
            return Err(e);
        }
    };

    info!("Extracting text from {}", path.display());

    let result = match kind {
        DocumentKind::Pdf => pdf::extract(path),
        DocumentKind::Word => docx::extract(path),
        DocumentKind::Spreadsheet => xlsx::extract(path),
        DocumentKind::SlideDeck => pptx::extract(path),
        DocumentKind::PlainText => extract_plain_text(path),
    };

    result.inspect_err(|e| error!("Failed to extract {}: {e}", path.display()))
}

/// Extract a file and wrap the result as a [`Document`].
pub fn extract_document<P: AsRef<Path>>(id: &str, path: P) -> Result<Document, ExtractError> {
    let path = path.as_ref();
    let kind = DocumentKind::from_path(path)?;
    let raw_text = extract_text(path)?;
    Ok(Document {
        id: id.to_string(),
        source_path: path.to_path_buf(),
        media_type: kind.media_type(),
        raw_text,
    })
}

fn extract_plain_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| failed("cannot read file", e))?;
    String::from_utf8(bytes).map_err(|e| failed("file is not valid UTF-8", e))
}

/// Build an `ExtractionFailed` from any displayable cause.
pub(crate) fn failed(what: &str, cause: impl std::fmt::Display) -> ExtractError {
    ExtractError::ExtractionFailed(format!("{what}: {cause}"))
}
