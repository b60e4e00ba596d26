//! Text extraction (C1): turns a document blob into normalized UTF-8 text,
//! falling back to OCR when native extraction is sparse.
//!
//! Grounded on the hybrid pdftotext/Tesseract extractor pattern: run native
//! extraction first, compare per-page character counts against OCR, and keep
//! whichever wins.

mod docx;
mod ocr;
mod pdf;
mod plain;

use std::path::Path;

use tracing::debug;

use crate::error::ExtractError;
use crate::model::{ContentType, ExtractedText, ExtractionMethod, InputRef};

/// Minimum non-whitespace characters per page below which OCR is attempted.
const DEFAULT_OCR_THRESHOLD_CHARS_PER_PAGE: usize = 40;

pub struct TextExtractor {
    ocr_threshold_chars_per_page: usize,
    tesseract_lang: String,
    max_document_bytes: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self {
            ocr_threshold_chars_per_page: DEFAULT_OCR_THRESHOLD_CHARS_PER_PAGE,
            tesseract_lang: "eng".to_string(),
            max_document_bytes: 50 * 1024 * 1024,
        }
    }
}

impl TextExtractor {
    pub fn new(ocr_threshold_chars_per_page: usize, max_document_bytes: usize) -> Self {
        Self {
            ocr_threshold_chars_per_page,
            tesseract_lang: "eng".to_string(),
            max_document_bytes,
        }
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.tesseract_lang = lang.into();
        self
    }

    /// Extract normalized text from an input reference, sniffing the content
    /// type from magic bytes when the caller declared `Unknown`.
    pub async fn extract(
        &self,
        input: &InputRef,
        declared: ContentType,
    ) -> Result<ExtractedText, ExtractError> {
        let bytes = self.load_bytes(input).await?;
        if bytes.len() > self.max_document_bytes {
            return Err(ExtractError::TooLarge);
        }

        let content_type = if declared == ContentType::Unknown {
            sniff_content_type(&bytes)
        } else {
            declared
        };

        let result = match content_type {
            ContentType::Pdf => {
                pdf::extract_pdf(&bytes, self.ocr_threshold_chars_per_page, &self.tesseract_lang)
                    .await?
            }
            ContentType::Docx => docx::extract_docx(&bytes)?,
            ContentType::PlainText => plain::extract_plain(&bytes),
            ContentType::Unknown => {
                return Err(ExtractError::Unsupported("unknown".to_string()))
            }
        };

        if result.text.trim().is_empty() {
            return Err(ExtractError::Empty);
        }

        debug!(
            method = ?result.method,
            bytes = bytes.len(),
            "extracted document text"
        );

        Ok(finalize(result))
    }

    async fn load_bytes(&self, input: &InputRef) -> Result<Vec<u8>, ExtractError> {
        match input {
            InputRef::Blob(bytes) => Ok(bytes.clone()),
            InputRef::Path(path) => read_file(path).await,
        }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractError::Corrupt(format!("{}: not found", path.display()))
        } else {
            ExtractError::Io(e)
        }
    })
}

fn sniff_content_type(bytes: &[u8]) -> ContentType {
    match infer::get(bytes).map(|t| t.mime_type()) {
        Some("application/pdf") => ContentType::Pdf,
        Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document") => {
            ContentType::Docx
        }
        Some(mime) if mime.starts_with("text/") => ContentType::PlainText,
        _ if std::str::from_utf8(bytes).is_ok() => ContentType::PlainText,
        _ => ContentType::Unknown,
    }
}

/// Raw extraction output before quality/token-count finalization.
pub(crate) struct RawExtraction {
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: Option<u32>,
    pub page_offsets: Option<Vec<usize>>,
}

fn finalize(raw: RawExtraction) -> ExtractedText {
    let total_chars = raw.text.chars().count().max(1);
    let printable = raw
        .text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .count();
    let quality = (printable as f32 / total_chars as f32).clamp(0.0, 1.0);
    let token_estimate = (raw.text.len() as f64 / 4.0).ceil() as usize;

    ExtractedText {
        byte_len: raw.text.len(),
        language: detect_dominant_language(&raw.text),
        text: raw.text,
        method: raw.method,
        page_offsets: raw.page_offsets,
        quality,
        token_estimate,
    }
}

/// Best-effort dominant-language detection: a simple heuristic over common
/// stopwords rather than a full language model. Good enough for the
/// "best-effort, no translation" contract.
fn detect_dominant_language(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let english_hits = ["the ", " and ", " of ", " to "]
        .iter()
        .filter(|w| lower.contains(*w))
        .count();
    let french_hits = [" le ", " la ", " de ", " et "]
        .iter()
        .filter(|w| lower.contains(*w))
        .count();
    let spanish_hits = [" el ", " la ", " de ", " y "]
        .iter()
        .filter(|w| lower.contains(*w))
        .count();

    let best = [("en", english_hits), ("fr", french_hits), ("es", spanish_hits)]
        .into_iter()
        .max_by_key(|(_, hits)| *hits);

    match best {
        Some((lang, hits)) if hits > 0 => Some(lang.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_is_extracted_verbatim() {
        let extractor = TextExtractor::default();
        let input = InputRef::Blob(b"hello\r\nworld".to_vec());
        let result = extractor
            .extract(&input, ContentType::PlainText)
            .await
            .unwrap();
        assert_eq!(result.text, "hello\nworld");
        assert_eq!(result.method, ExtractionMethod::Native);
        assert!(result.quality > 0.9);
    }

    #[tokio::test]
    async fn oversize_input_is_rejected() {
        let extractor = TextExtractor::new(40, 10);
        let input = InputRef::Blob(vec![b'a'; 100]);
        let err = extractor
            .extract(&input, ContentType::PlainText)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::TooLarge));
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let extractor = TextExtractor::default();
        let input = InputRef::Blob(b"   \n  \n".to_vec());
        let err = extractor
            .extract(&input, ContentType::PlainText)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }

    #[test]
    fn dominant_language_prefers_most_hits() {
        assert_eq!(
            detect_dominant_language("the quick fox and the lazy dog"),
            Some("en".to_string())
        );
    }
}
