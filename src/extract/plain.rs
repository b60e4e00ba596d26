//! Plain-text decoding: UTF-8 with replacement, line endings normalized to `\n`.

use super::RawExtraction;
use crate::model::ExtractionMethod;

pub fn extract_plain(bytes: &[u8]) -> RawExtraction {
    let decoded = String::from_utf8_lossy(bytes);
    let normalized = normalize_line_endings(&decoded);
    RawExtraction {
        text: normalized,
        method: ExtractionMethod::Native,
        page_count: None,
        page_offsets: None,
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_and_cr() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }
}
