//! Tesseract invocation helpers shared by the PDF and image extraction paths.

use std::path::Path;

use tokio::process::Command;

use crate::error::ExtractError;

pub async fn run_tesseract(image_path: &Path, lang: &str) -> Result<String, ExtractError> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .args(["-l", lang])
        .output()
        .await;

    handle_cmd_output(output, "tesseract (install tesseract-ocr)", "tesseract failed")
}

pub fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, ExtractError> {
    match result {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ExtractError::Corrupt(format!("{error_prefix}: {stderr}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ExtractError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(ExtractError::Io(e)),
    }
}

pub fn non_whitespace_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
