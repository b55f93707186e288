//! Page extraction: split a PDF into single-page files, pull their text and
//! draw thumbnails.
//!
//! Every artifact lands at a path derived from the document hash and page
//! number, so running an extraction twice overwrites instead of
//! accumulating files.

use serde::Serialize;
use thiserror::Error;

use crate::error::StorageError;

pub mod inspect;
pub mod pdf;
pub mod thumbnail;

pub use inspect::{count_pages, extract_metadata, validate_pdf, PdfMetadata};
pub use pdf::PdfPageExtractor;

#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The file is not a well-formed PDF.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Page {page_number} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page_number: u32, page_count: u32 },

    #[error("Source unreadable: {0}")]
    Unreadable(String),

    #[error("Invalid page file {path}: {reason}")]
    InvalidPage { path: String, reason: String },

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// Only storage hiccups are worth waiting for; everything else is a
    /// property of the bytes and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Where a page job reads its source from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    pub document_hash: String,
    /// Blob path of the original file.
    pub file_path: String,
}

/// Geometry of a validated single-page file, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageInfo {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

pub trait PageExtractor: Send + Sync {
    /// Isolates one page into its own file and returns the blob path.
    fn extract_page(&self, source: &PageSource, page_number: u32)
        -> Result<String, ExtractionError>;

    /// Structural check of a single-page file.
    fn validate_page_file(&self, page_path: &str) -> Result<PageInfo, ExtractionError>;

    /// Text of a single-page file; empty for image-only pages.
    fn extract_text(&self, page_path: &str) -> Result<String, ExtractionError>;

    /// Thumbnail fitted inside `width` x `height`, aspect ratio preserved.
    fn generate_thumbnail(
        &self,
        page_path: &str,
        width: u32,
        height: u32,
    ) -> Result<Thumbnail, ExtractionError>;

    /// Removes every page and thumbnail blob of a document. Returns the number
    /// of blobs removed.
    fn cleanup_page_files(&self, document_hash: &str) -> Result<u64, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_transient() {
        let timed_out = ExtractionError::Storage(StorageError::ReadFile {
            path: "pages/a/page-1.pdf".into(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "nfs"),
        });
        assert!(timed_out.is_transient());
        assert!(!ExtractionError::InvalidPage {
            path: "pages/a/page-1.pdf".to_string(),
            reason: "bad stream".to_string()
        }
        .is_transient());
        assert!(!ExtractionError::Cancelled.is_transient());
    }
}
