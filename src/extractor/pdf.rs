use std::path::Path;

use lopdf::Document;
use tracing::debug;

use super::{ExtractError, failed};

/// Concatenate the text of every page in page order.
///
/// A page whose text cannot be decoded contributes nothing; only a document
/// that fails to load fails the extraction.
pub fn extract(path: &Path) -> Result<String, ExtractError> {
    let doc = Document::load(path).map_err(|e| failed("invalid PDF", e))?;

    let mut text = String::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(page_text) => text.push_str(&page_text),
            Err(e) => debug!("No extractable text on page {page_number}: {e}"),
        }
    }

    Ok(text)
}
