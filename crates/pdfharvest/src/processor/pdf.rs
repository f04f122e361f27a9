use crate::error::ExtractionError;
use crate::processor::TextExtractor;

/// Inserted between the text of consecutive pages.
pub const PAGE_BREAK: &str = "\n\n----- PAGE BREAK -----\n\n";

/// Text extraction with lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("processor.pdf", bytes = bytes.len()).entered();

        if bytes.is_empty() {
            return Err(ExtractionError::Malformed("empty document".to_string()));
        }

        let doc =
            lopdf::Document::load_mem(bytes).map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(ExtractionError::Encrypted);
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(ExtractionError::NoPages);
        }

        let mut texts = Vec::with_capacity(pages.len());
        for page_num in pages.keys().copied() {
            let text = doc.extract_text(&[page_num]).map_err(|e| {
                tracing::debug!(page = page_num, error = %e, "Page text extraction failed");
                ExtractionError::Page {
                    page: page_num,
                    reason: e.to_string(),
                }
            })?;
            texts.push(text.trim().to_string());
        }

        if texts.iter().all(|t| t.is_empty()) {
            return Err(ExtractionError::NoText);
        }

        Ok(texts.join(PAGE_BREAK).trim().to_string())
    }
}
