use std::sync::Arc;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::inspect::{page_count_of, validate_pdf};
use super::thumbnail::{render_thumbnail, ThumbnailSource};
use super::{ExtractionError, PageExtractor, PageInfo, PageSource, Thumbnail};
use crate::storage::{paths, BlobStore};

/// `PageExtractor` over lopdf, writing through a blob store.
pub struct PdfPageExtractor {
    blobs: Arc<dyn BlobStore>,
}

impl PdfPageExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn load_page_file(&self, page_path: &str) -> Result<(Document, ObjectId), ExtractionError> {
        let bytes = self.blobs.get(page_path)?;
        let doc = Document::load_mem(&bytes).map_err(|e| ExtractionError::InvalidPage {
            path: page_path.to_string(),
            reason: format!("unparseable: {}", e),
        })?;
        let pages = doc.get_pages();
        if pages.len() != 1 {
            return Err(ExtractionError::InvalidPage {
                path: page_path.to_string(),
                reason: format!("expected 1 page, found {}", pages.len()),
            });
        }
        let page_id = pages
            .values()
            .next()
            .copied()
            .ok_or_else(|| ExtractionError::InvalidPage {
                path: page_path.to_string(),
                reason: "page tree is empty".to_string(),
            })?;
        Ok((doc, page_id))
    }
}

impl PageExtractor for PdfPageExtractor {
    fn extract_page(
        &self,
        source: &PageSource,
        page_number: u32,
    ) -> Result<String, ExtractionError> {
        let _span = tracing::debug_span!("extract.page", page = page_number).entered();

        let bytes = self.blobs.get(&source.file_path).map_err(|e| match e {
            crate::error::StorageError::NotFound(path) => {
                ExtractionError::Unreadable(format!("source blob {} is missing", path))
            }
            other => ExtractionError::Storage(other),
        })?;
        let mut doc = validate_pdf(&bytes).map_err(|e| match e {
            ExtractionError::InvalidDocument(reason) => ExtractionError::Unreadable(reason),
            other => other,
        })?;

        let page_count = page_count_of(&doc)?;
        if page_number == 0 || page_number > page_count {
            return Err(ExtractionError::PageOutOfRange {
                page_number,
                page_count,
            });
        }

        let others: Vec<u32> = (1..=page_count).filter(|n| *n != page_number).collect();
        doc.delete_pages(&others);
        doc.prune_objects();

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| ExtractionError::Unreadable(format!("failed to write page: {}", e)))?;

        let path = paths::page(&source.document_hash, page_number);
        self.blobs.put(&path, &buffer)?;
        Ok(path)
    }

    fn validate_page_file(&self, page_path: &str) -> Result<PageInfo, ExtractionError> {
        let (doc, page_id) = self.load_page_file(page_path)?;
        let invalid = |reason: String| ExtractionError::InvalidPage {
            path: page_path.to_string(),
            reason,
        };

        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| invalid(format!("page object: {}", e)))?;
        let (width, height) = media_box(&doc, page).ok_or_else(|| invalid("no usable MediaBox".to_string()))?;

        for stream_id in content_stream_refs(page) {
            let stream = doc
                .get_object(stream_id)
                .and_then(Object::as_stream)
                .map_err(|e| {
                    invalid(format!(
                        "content stream {} {} R: {}",
                        stream_id.0, stream_id.1, e
                    ))
                })?;
            let data = if stream.dict.has(b"Filter") {
                stream
                    .decompressed_content()
                    .map_err(|e| invalid(format!("content stream does not decode: {}", e)))?
            } else {
                stream.content.clone()
            };
            Content::decode(&data)
                .map_err(|e| invalid(format!("content operators do not parse: {}", e)))?;
        }

        Ok(PageInfo { width, height })
    }

    fn extract_text(&self, page_path: &str) -> Result<String, ExtractionError> {
        let (doc, _) = self.load_page_file(page_path)?;
        if doc
            .get_pages()
            .values()
            .next()
            .and_then(|id| doc.get_dictionary(*id).ok())
            .map(|page| !page.has(b"Contents"))
            .unwrap_or(true)
        {
            return Ok(String::new());
        }
        let text = doc
            .extract_text(&[1])
            .map_err(|e| ExtractionError::TextExtraction(e.to_string()))?;
        Ok(normalize_whitespace(&text))
    }

    fn generate_thumbnail(
        &self,
        page_path: &str,
        width: u32,
        height: u32,
    ) -> Result<Thumbnail, ExtractionError> {
        let (hash, page_number) =
            paths::parse_page(page_path).ok_or_else(|| ExtractionError::InvalidPage {
                path: page_path.to_string(),
                reason: "not a page blob path".to_string(),
            })?;
        let (doc, page_id) = self.load_page_file(page_path)?;
        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| ExtractionError::Thumbnail(e.to_string()))?;

        let source = match largest_jpeg(&doc, page) {
            Some(bytes) => ThumbnailSource::Jpeg(bytes),
            None => {
                let (w, h) = media_box(&doc, page).unwrap_or((612.0, 792.0));
                ThumbnailSource::Blank {
                    page_width: w,
                    page_height: h,
                }
            }
        };
        let rendered = render_thumbnail(&source, width, height)?;

        let path = paths::thumbnail(hash, page_number);
        self.blobs.put(&path, &rendered.png)?;
        Ok(Thumbnail {
            path,
            width: rendered.width,
            height: rendered.height,
        })
    }

    fn cleanup_page_files(&self, document_hash: &str) -> Result<u64, ExtractionError> {
        let pages = self.blobs.delete_prefix(&paths::pages_prefix(document_hash))?;
        let thumbnails = self
            .blobs
            .delete_prefix(&paths::thumbnails_prefix(document_hash))?;
        Ok(pages + thumbnails)
    }
}

/// Looks up a page attribute, following `Parent` for inheritable keys.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return doc.dereference(value).ok().map(|(_, obj)| obj);
        }
        current = current
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .ok()?;
    }
    None
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn media_box(doc: &Document, page: &Dictionary) -> Option<(f64, f64)> {
    let values = inherited(doc, page, b"MediaBox")?.as_array().ok()?;
    let coords: Vec<f64> = values.iter().filter_map(number).collect();
    if coords.len() != 4 {
        return None;
    }
    let width = (coords[2] - coords[0]).abs();
    let height = (coords[3] - coords[1]).abs();
    (width > 0.0 && height > 0.0).then_some((width, height))
}

/// Object ids of the page's content streams. A missing `Contents` entry is a
/// blank page.
fn content_stream_refs(page: &Dictionary) -> Vec<ObjectId> {
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => vec![*id],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_reference().ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn is_dct(stream_dict: &Dictionary) -> bool {
    match stream_dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == b"DCTDecode",
        Ok(Object::Array(filters)) => matches!(
            filters.last(),
            Some(Object::Name(name)) if name.as_slice() == b"DCTDecode"
        ),
        _ => false,
    }
}

/// Raw bytes of the largest JPEG image XObject drawn on the page.
fn largest_jpeg(doc: &Document, page: &Dictionary) -> Option<Vec<u8>> {
    let resources = inherited(doc, page, b"Resources")?.as_dict().ok()?;
    let xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| doc.dereference(obj).ok())
        .and_then(|(_, obj)| obj.as_dict().ok())?;

    xobjects
        .iter()
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, obj)| obj.as_stream().ok())
        .filter(|stream| {
            matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n.as_slice() == b"Image")
                && is_dct(&stream.dict)
        })
        .max_by_key(|stream| {
            let w = stream.dict.get(b"Width").ok().and_then(number).unwrap_or(0.0);
            let h = stream.dict.get(b"Height").ok().and_then(number).unwrap_or(0.0);
            (w * h) as u64
        })
        .map(|stream| stream.content.clone())
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileBlobStore;
    use lopdf::{dictionary, Stream};
    use tempfile::TempDir;

    /// Builds a PDF whose pages each carry one line of text. `None` makes a
    /// page whose content stream reference dangles.
    fn text_pdf(pages: &[Option<&str>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let mut kids = Vec::new();
        for text in pages {
            let contents: Object = match text {
                Some(text) => {
                    let ops = format!("BT /F1 12 Tf 50 742 Td ({}) Tj ET", text);
                    doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()))
                        .into()
                }
                None => Object::Reference((9999, 0)),
            };
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                "Contents" => contents,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn extractor_with(pdf: &[u8]) -> (TempDir, PdfPageExtractor, PageSource) {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(dir.path()));
        blobs.put("documents/abc/original.pdf", pdf).unwrap();
        let source = PageSource {
            document_hash: "abc".to_string(),
            file_path: "documents/abc/original.pdf".to_string(),
        };
        (dir, PdfPageExtractor::new(blobs), source)
    }

    #[test]
    fn test_extract_page_isolates_one_page() {
        let (_dir, extractor, source) =
            extractor_with(&text_pdf(&[Some("alpha"), Some("bravo"), Some("charlie")]));

        let path = extractor.extract_page(&source, 2).unwrap();
        assert_eq!(path, "pages/abc/page-2.pdf");

        let info = extractor.validate_page_file(&path).unwrap();
        assert_eq!(info.width, 612.0);
        assert_eq!(info.height, 792.0);

        let text = extractor.extract_text(&path).unwrap();
        assert!(text.contains("bravo"), "got {:?}", text);
        assert!(!text.contains("alpha"));
    }

    #[test]
    fn test_extract_page_is_repeatable() {
        let (dir, extractor, source) = extractor_with(&text_pdf(&[Some("alpha")]));
        extractor.extract_page(&source, 1).unwrap();
        extractor.extract_page(&source, 1).unwrap();

        let files = std::fs::read_dir(dir.path().join("pages/abc")).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_out_of_range_page() {
        let (_dir, extractor, source) = extractor_with(&text_pdf(&[Some("alpha")]));
        let err = extractor.extract_page(&source, 2).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::PageOutOfRange {
                page_number: 2,
                page_count: 1
            }
        ));
        assert!(extractor.extract_page(&source, 0).is_err());
    }

    #[test]
    fn test_missing_source_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let extractor = PdfPageExtractor::new(Arc::new(FileBlobStore::new(dir.path())));
        let source = PageSource {
            document_hash: "abc".to_string(),
            file_path: "documents/abc/original.pdf".to_string(),
        };
        assert!(matches!(
            extractor.extract_page(&source, 1),
            Err(ExtractionError::Unreadable(_))
        ));
    }

    #[test]
    fn test_dangling_content_stream_fails_validation() {
        let (_dir, extractor, source) = extractor_with(&text_pdf(&[Some("alpha"), None]));
        let path = extractor.extract_page(&source, 2).unwrap();
        let err = extractor.validate_page_file(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidPage { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_thumbnail_fits_box() {
        let (dir, extractor, source) = extractor_with(&text_pdf(&[Some("alpha")]));
        let path = extractor.extract_page(&source, 1).unwrap();

        let thumb = extractor.generate_thumbnail(&path, 200, 200).unwrap();
        assert_eq!(thumb.path, "thumbnails/abc/page-1.png");
        // Letter portrait: height-bound.
        assert_eq!(thumb.height, 200);
        assert!(thumb.width < 200);
        assert!(dir.path().join("thumbnails/abc/page-1.png").is_file());
    }

    #[test]
    fn test_cleanup_page_files() {
        let (dir, extractor, source) =
            extractor_with(&text_pdf(&[Some("alpha"), Some("bravo")]));
        for n in 1..=2 {
            let path = extractor.extract_page(&source, n).unwrap();
            extractor.generate_thumbnail(&path, 100, 100).unwrap();
        }

        assert_eq!(extractor.cleanup_page_files("abc").unwrap(), 4);
        assert_eq!(extractor.cleanup_page_files("abc").unwrap(), 0);
        assert!(dir.path().join("documents/abc/original.pdf").is_file());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a   b \n\n c "), "a b\nc");
    }
}
