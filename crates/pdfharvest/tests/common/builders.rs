//! Builders for test documents, extractors and limits.

#![allow(dead_code)]

use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use pdfharvest::fetch::{BackoffPolicy, FetchLimits};
use pdfharvest::{ExtractionError, TextExtractor};

/// Exactly `len` bytes that sniff as PDF. Not parseable by a real extractor.
pub fn pdf_bytes(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.4\n".to_vec();
    body.resize(len.max(body.len()), b'x');
    body
}

/// A real PDF, one page per entry.
pub fn text_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
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

/// Returns the same text for any input.
pub struct FixedText(pub &'static str);

impl TextExtractor for FixedText {
    fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractionError> {
        Ok(self.0.to_string())
    }
}

pub struct PanickingExtractor;

impl TextExtractor for PanickingExtractor {
    fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractionError> {
        panic!("extractor blew up");
    }
}

/// Fast retries, short timeouts.
pub fn test_limits() -> FetchLimits {
    FetchLimits {
        max_bytes: 10 * 1024 * 1024,
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        max_retries: 2,
        backoff: BackoffPolicy {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            jitter: false,
        },
        user_agent: "pdfharvest-tests".to_string(),
    }
}
