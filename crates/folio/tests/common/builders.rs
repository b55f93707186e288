//! Builders for test documents.

#![allow(dead_code)]

use lopdf::{dictionary, Document, Object, Stream, StringFormat};

enum FixturePage {
    Text(String),
    /// Content stream reference that points nowhere; parses as a document
    /// but fails when the page is extracted.
    Corrupted,
}

/// Builder for small text PDFs, one line of Courier per page.
pub struct PdfFixture {
    pages: Vec<FixturePage>,
    title: Option<String>,
}

impl PdfFixture {
    pub fn pages(texts: &[&str]) -> Self {
        Self {
            pages: texts
                .iter()
                .map(|t| FixturePage::Text((*t).to_string()))
                .collect(),
            title: None,
        }
    }

    /// `count` pages reading "page 1", "page 2", ...
    pub fn numbered(count: u32) -> Self {
        Self {
            pages: (1..=count)
                .map(|n| FixturePage::Text(format!("page {}", n)))
                .collect(),
            title: None,
        }
    }

    /// Replaces page `page_number` (1-based) with a corrupted one.
    pub fn corrupt_page(mut self, page_number: usize) -> Self {
        self.pages[page_number - 1] = FixturePage::Corrupted;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in &self.pages {
            let contents: Object = match page {
                FixturePage::Text(text) => {
                    let ops = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
                    doc.add_object(Stream::new(dictionary! {}, ops.into_bytes()))
                        .into()
                }
                FixturePage::Corrupted => Object::Reference((9999, 0)),
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
                "Count" => self.pages.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        if let Some(title) = &self.title {
            let info_id = doc.add_object(dictionary! {
                "Title" => Object::String(title.as_bytes().to_vec(), StringFormat::Literal),
            });
            doc.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}
