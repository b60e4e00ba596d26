//! DOCX extraction: walk `word/document.xml` inside the zip container,
//! preserving paragraph order and ignoring embedded images.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use zip::ZipArchive;

use super::RawExtraction;
use crate::error::ExtractError;
use crate::model::ExtractionMethod;

const DOCUMENT_XML: &str = "word/document.xml";

pub fn extract_docx(bytes: &[u8]) -> Result<RawExtraction, ExtractError> {
    let cursor = Cursor::new(bytes);
    let mut archive =
        ZipArchive::new(cursor).map_err(|e| ExtractError::Corrupt(format!("not a zip: {e}")))?;

    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name(DOCUMENT_XML)
            .map_err(|e| ExtractError::Corrupt(format!("missing {DOCUMENT_XML}: {e}")))?;
        entry
            .read_to_string(&mut xml)
            .map_err(|e| ExtractError::Corrupt(format!("non-UTF8 document.xml: {e}")))?;
    }

    let paragraphs = walk_paragraphs(&xml)?;

    Ok(RawExtraction {
        text: paragraphs.join("\n"),
        method: ExtractionMethod::Native,
        page_count: None,
        page_offsets: None,
    })
}

/// Collects text runs (`<w:t>`) per paragraph (`<w:p>`), joining runs within
/// a paragraph with no separator (Word splits runs mid-sentence for
/// formatting reasons) and emitting one output line per paragraph.
fn walk_paragraphs(xml: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) if tag.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(tag)) if tag.local_name().as_ref() == b"t" => {
                in_text_run = false;
            }
            Ok(Event::End(tag)) if tag.local_name().as_ref() == b"p" => {
                paragraphs.push(std::mem::take(&mut current));
            }
            Ok(Event::Text(text)) if in_text_run => {
                let decoded = text
                    .unescape()
                    .map_err(|e| ExtractError::Corrupt(format!("bad xml text: {e}")))?;
                current.push_str(&decoded);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ExtractError::Corrupt(format!("xml parse error: {e}"))),
        }
        buf.clear();
    }

    Ok(paragraphs.into_iter().filter(|p| !p.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_simple_paragraphs() {
        let xml = r#"<w:document xmlns:w="ns">
            <w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;
        let paragraphs = walk_paragraphs(xml).unwrap();
        assert_eq!(paragraphs, vec!["Hello world", "Second paragraph"]);
    }
}
