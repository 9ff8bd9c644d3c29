//! PDF text extraction via `pdftotext` (poppler-utils).

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use papertrail_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;
use papertrail_core::{Error, Result, TextExtractor};

/// Form feed emitted by `pdftotext` between pages.
const PAGE_BREAK: char = '\u{000C}';

/// Extracts the text layer of a PDF by running `pdftotext` on a temp file.
///
/// Pages are returned in document order, separated by newlines. Scanned
/// documents without a text layer come back empty or whitespace-only; the
/// caller decides what that means.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    timeout: Duration,
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(EXTRACTION_CMD_TIMEOUT_SECS),
        }
    }
}

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the `pdftotext` binary can be executed.
    pub async fn health_check(&self) -> bool {
        match Command::new("pdftotext").arg("-v").output().await {
            // -v exits 0 or 99 depending on the poppler version.
            Ok(output) => output.status.success() || output.status.code() == Some(99),
            Err(_) => false,
        }
    }
}

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<String> {
    let output = tokio::time::timeout(timeout, cmd.kill_on_drop(true).output())
        .await
        .map_err(|_| {
            Error::Extraction(format!(
                "pdftotext timed out after {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::Extraction(format!("Failed to execute pdftotext: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extraction(format!(
            "pdftotext failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(Error::Extraction(
                "Cannot extract text from empty document".to_string(),
            ));
        }
        if !data.starts_with(b"%PDF") {
            return Err(Error::Extraction(
                "Document is not a valid PDF (missing %PDF header)".to_string(),
            ));
        }

        let mut tmpfile = NamedTempFile::new()
            .map_err(|e| Error::Extraction(format!("Failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(data)
            .map_err(|e| Error::Extraction(format!("Failed to write temp file: {}", e)))?;

        let text = run_cmd_with_timeout(
            Command::new("pdftotext")
                .arg("-enc")
                .arg("UTF-8")
                .arg(tmpfile.path())
                .arg("-"),
            self.timeout,
        )
        .await?;

        let text = join_pages(&text);
        debug!(
            subsystem = "jobs",
            component = "extraction",
            bytes = data.len(),
            chars = text.chars().count(),
            "PDF text extracted"
        );
        Ok(text)
    }
}

/// Replace page breaks with newlines, dropping the trailing one.
fn join_pages(raw: &str) -> String {
    raw.trim_end_matches(PAGE_BREAK)
        .split(PAGE_BREAK)
        .collect::<Vec<_>>()
        .join("\n")
}
