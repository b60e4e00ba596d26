//! PDF extraction: native text first (`pdftotext`), OCR fallback
//! (`pdftoppm` + `tesseract`) when the printable-chars-per-page average is
//! below the configured threshold.

use tempfile::TempDir;
use tokio::process::Command;

use super::ocr::{handle_cmd_output, non_whitespace_chars, run_tesseract};
use super::RawExtraction;
use crate::error::ExtractError;
use crate::model::ExtractionMethod;

/// Native text yielded for a page below this many characters is treated as
/// "missing" and OCR output for that page is appended instead (§4.1).
const PAGE_NATIVE_MIN_CHARS: usize = 10;

pub async fn extract_pdf(
    bytes: &[u8],
    ocr_threshold_chars_per_page: usize,
    tesseract_lang: &str,
) -> Result<RawExtraction, ExtractError> {
    let temp_dir = TempDir::new()?;
    let pdf_path = temp_dir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, bytes).await?;

    let page_count = get_pdf_page_count(&pdf_path).await.unwrap_or(1).max(1);
    let native_pages = extract_native_pages(&pdf_path, page_count).await;

    let total_native_chars: usize = native_pages.iter().map(|p| non_whitespace_chars(p)).sum();
    let avg_chars_per_page = total_native_chars / page_count as usize;

    if avg_chars_per_page >= ocr_threshold_chars_per_page {
        return Ok(RawExtraction {
            text: native_pages.join("\n\n"),
            method: ExtractionMethod::Native,
            page_count: Some(page_count),
            page_offsets: Some(page_offsets(&native_pages)),
        });
    }

    // Sparse native text: rasterize and OCR, then merge page by page.
    let image_paths = rasterize_pdf(&pdf_path, temp_dir.path()).await;
    let mut used_ocr = false;
    let mut final_pages = Vec::with_capacity(native_pages.len());

    for (idx, native_page) in native_pages.iter().enumerate() {
        let page_num = (idx + 1) as u32;
        if non_whitespace_chars(native_page) >= PAGE_NATIVE_MIN_CHARS {
            final_pages.push(native_page.clone());
            continue;
        }

        let ocr_text = match image_paths.get(idx) {
            Some(path) => run_tesseract(path, tesseract_lang).await.ok(),
            None => None,
        };

        match ocr_text {
            Some(text) if !text.trim().is_empty() => {
                used_ocr = true;
                let mut combined = native_page.clone();
                if !combined.trim().is_empty() {
                    combined.push_str("\n\n");
                }
                combined.push_str(&text);
                final_pages.push(combined);
            }
            _ => final_pages.push(native_page.clone()),
        }
        let _ = page_num;
    }

    let method = if used_ocr {
        ExtractionMethod::Ocr
    } else {
        ExtractionMethod::Native
    };

    Ok(RawExtraction {
        text: final_pages.join("\n\n"),
        page_offsets: Some(page_offsets(&final_pages)),
        page_count: Some(page_count),
        method,
    })
}

fn page_offsets(pages: &[String]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(pages.len());
    let mut running = 0usize;
    for page in pages {
        offsets.push(running);
        running += page.len() + 2; // account for the "\n\n" join separator
    }
    offsets
}

async fn extract_native_pages(pdf_path: &std::path::Path, page_count: u32) -> Vec<String> {
    let mut pages = Vec::with_capacity(page_count as usize);
    for page in 1..=page_count {
        let text = extract_pdf_page_text(pdf_path, page).await.unwrap_or_default();
        pages.push(text);
    }
    pages
}

async fn extract_pdf_page_text(
    pdf_path: &std::path::Path,
    page: u32,
) -> Result<String, ExtractError> {
    let page_str = page.to_string();
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8", "-f", &page_str, "-l", &page_str])
        .arg(pdf_path)
        .arg("-")
        .output()
        .await;

    handle_cmd_output(
        output,
        "pdftotext (install poppler-utils)",
        &format!("pdftotext failed on page {page}"),
    )
}

async fn get_pdf_page_count(pdf_path: &std::path::Path) -> Option<u32> {
    let output = Command::new("pdfinfo").arg(pdf_path).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}

async fn rasterize_pdf(
    pdf_path: &std::path::Path,
    temp_path: &std::path::Path,
) -> Vec<std::path::PathBuf> {
    let status = Command::new("pdftoppm")
        .args(["-png", "-r", "300"])
        .arg(pdf_path)
        .arg(temp_path.join("page"))
        .status()
        .await;

    match status {
        Ok(s) if s.success() => {}
        _ => {
            tracing::debug!("pdftoppm unavailable or failed, OCR fallback skipped");
            return Vec::new();
        }
    }

    let mut images: Vec<_> = match std::fs::read_dir(temp_path) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "png").unwrap_or(false))
            .map(|e| e.path())
            .collect(),
        Err(_) => Vec::new(),
    };
    images.sort();
    images
}
