//! PDF drafts

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::types::NoteDraft;

const DEFAULT_TITLE: &str = "Imported PDF";

/// Build the single draft for an uploaded PDF.
///
/// The body always starts with a summary line. Text extracted from the
/// document follows it when extraction succeeds within `limit`; extraction
/// problems only cost the extra text.
pub async fn pdf_draft(file: &Path, filename: &str, ocr: bool, limit: Duration) -> NoteDraft {
    let title = if filename.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        filename.to_string()
    };
    let summary = format!(
        "Imported PDF \"{}\". OCR requested: {}.",
        filename,
        if ocr { "yes" } else { "no" }
    );

    let body = match extract_text(file.to_path_buf(), limit).await {
        Ok(text) if !text.is_empty() => format!("{}\n\n{}", summary, text),
        Ok(_) => summary,
        Err(e) => {
            tracing::warn!("[{}] PDF text extraction skipped: {}", filename, e);
            summary
        }
    };

    NoteDraft { title, body }
}

/// Extract trimmed text on a blocking thread, bounded by `limit`
async fn extract_text(path: PathBuf, limit: Duration) -> Result<String> {
    let task = tokio::task::spawn_blocking(move || -> Result<String> {
        let data = std::fs::read(&path)?;
        let text = pdf_extract::extract_text_from_mem(&data)
            .map_err(|e| Error::file_parse(path.display().to_string(), e.to_string()))?;
        Ok(text.trim().to_string())
    });

    match timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::internal(format!("PDF extraction panicked: {}", join_err))),
        Err(_) => Err(Error::Timeout(format!(
            "PDF extraction took longer than {}s",
            limit.as_secs()
        ))),
    }
}
