//! Blob storage for original files, per-page extracts and thumbnails.
//!
//! Paths are relative and namespaced by document hash, so writers for
//! different documents never touch the same file.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::StorageError;

pub mod filesystem;

pub use filesystem::FileBlobStore;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlobUsage {
    pub files: u64,
    pub bytes: u64,
}

pub trait BlobStore: Send + Sync {
    /// Stores `content` at `path`, replacing any previous blob.
    fn put(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;
    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;
    /// Returns whether something was removed.
    fn delete(&self, path: &str) -> Result<bool, StorageError>;
    fn exists(&self, path: &str) -> Result<bool, StorageError>;
    /// Removes every blob under `prefix`; returns how many were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;
    /// Local filesystem location for `path`, for readers that need a file.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError>;
    fn usage(&self) -> Result<BlobUsage, StorageError>;
}

pub mod paths {
    //! Deterministic blob layout.

    pub fn original(hash: &str) -> String {
        format!("documents/{}/original.pdf", hash)
    }

    pub fn document_prefix(hash: &str) -> String {
        format!("documents/{}", hash)
    }

    pub fn page(hash: &str, page_number: u32) -> String {
        format!("pages/{}/page-{}.pdf", hash, page_number)
    }

    pub fn pages_prefix(hash: &str) -> String {
        format!("pages/{}", hash)
    }

    pub fn thumbnail(hash: &str, page_number: u32) -> String {
        format!("thumbnails/{}/page-{}.png", hash, page_number)
    }

    pub fn thumbnails_prefix(hash: &str) -> String {
        format!("thumbnails/{}", hash)
    }

    /// Maps `pages/{hash}/page-{n}.pdf` back to `(hash, n)`.
    pub fn parse_page(path: &str) -> Option<(&str, u32)> {
        let rest = path.strip_prefix("pages/")?;
        let (hash, file) = rest.split_once('/')?;
        let number = file.strip_prefix("page-")?.strip_suffix(".pdf")?;
        if hash.is_empty() {
            return None;
        }
        number.parse().ok().map(|n| (hash, n))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_layout_is_namespaced_by_hash() {
            assert_eq!(page("abc", 3), "pages/abc/page-3.pdf");
            assert_eq!(thumbnail("abc", 3), "thumbnails/abc/page-3.png");
            assert_eq!(original("abc"), "documents/abc/original.pdf");
        }

        #[test]
        fn test_parse_page() {
            assert_eq!(parse_page("pages/abc/page-12.pdf"), Some(("abc", 12)));
            assert_eq!(parse_page("thumbnails/abc/page-1.png"), None);
            assert_eq!(parse_page("pages//page-1.pdf"), None);
            assert_eq!(parse_page("pages/abc/page-x.pdf"), None);
        }
    }
}
