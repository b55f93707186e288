//! Cheap whole-document checks run before any page work is scheduled.

use std::collections::BTreeMap;

use lopdf::{Document, Object};
use serde::Serialize;

use super::ExtractionError;

const PDF_MAGIC: &[u8] = b"%PDF-";
/// The header may be preceded by junk; readers accept it within the first KiB.
const HEADER_WINDOW: usize = 1024;
const TRAILER_WINDOW: usize = 2048;

const INFO_KEYS: &[&str] = &[
    "Title",
    "Author",
    "Subject",
    "Keywords",
    "Creator",
    "Producer",
    "CreationDate",
    "ModDate",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    pub version: String,
    pub page_count: u32,
    pub file_size: u64,
    /// Entries of the document Info dictionary that are present.
    pub info: BTreeMap<String, String>,
}

/// Header and trailer markers, checked before paying for a parse.
pub fn has_pdf_signature(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(HEADER_WINDOW)];
    let tail = &bytes[bytes.len().saturating_sub(TRAILER_WINDOW)..];
    contains(head, PDF_MAGIC) && contains(tail, b"%%EOF")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Fails fast on the signature, then parses the structure.
pub fn validate_pdf(bytes: &[u8]) -> Result<Document, ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::InvalidDocument("file is empty".to_string()));
    }
    if !has_pdf_signature(bytes) {
        return Err(ExtractionError::InvalidDocument(
            "missing PDF header or trailer".to_string(),
        ));
    }
    let doc = Document::load_mem(bytes)
        .map_err(|e| ExtractionError::InvalidDocument(format!("unparseable PDF: {}", e)))?;
    if doc.catalog().is_err() {
        return Err(ExtractionError::InvalidDocument(
            "document has no catalog".to_string(),
        ));
    }
    Ok(doc)
}

/// Page count of a valid PDF. A document without pages cannot be processed.
pub fn count_pages(bytes: &[u8]) -> Result<u32, ExtractionError> {
    let doc = validate_pdf(bytes)?;
    page_count_of(&doc)
}

pub(crate) fn page_count_of(doc: &Document) -> Result<u32, ExtractionError> {
    let count = doc.get_pages().len() as u32;
    if count == 0 {
        return Err(ExtractionError::InvalidDocument(
            "document has no pages".to_string(),
        ));
    }
    Ok(count)
}

pub fn extract_metadata(bytes: &[u8]) -> Result<PdfMetadata, ExtractionError> {
    let doc = validate_pdf(bytes)?;
    let page_count = page_count_of(&doc)?;

    let mut info = BTreeMap::new();
    let info_dict = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| doc.dereference(obj).ok())
        .and_then(|(_, obj)| obj.as_dict().ok());
    if let Some(dict) = info_dict {
        for key in INFO_KEYS {
            if let Ok(Object::String(raw, _)) = dict.get(key.as_bytes()) {
                let value = decode_text_string(raw);
                if !value.trim().is_empty() {
                    info.insert((*key).to_string(), value);
                }
            }
        }
    }

    Ok(PdfMetadata {
        version: doc.version.clone(),
        page_count,
        file_size: bytes.len() as u64,
        info,
    })
}

/// PDF text strings are UTF-16BE when they carry a BOM, PDFDocEncoding
/// (close enough to Latin-1 for metadata) otherwise.
fn decode_text_string(raw: &[u8]) -> String {
    if raw.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}
