//! Import task types: identifiers, options, formats and lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::note::ImportResult;
use crate::error::{Error, Result};
use crate::storage::ScratchHandle;

/// Opaque identifier of a queued import
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How parsed slides are grouped into notes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Everything in one note, slides separated by a blank line
    #[default]
    Single,
    /// One note per slide
    Pages,
    /// One note, slides separated by a horizontal rule
    Slides,
}

impl ImportMode {
    /// Parse a form value. Unknown values fall back to [`ImportMode::Single`].
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pages" => Self::Pages,
            "slides" => Self::Slides,
            _ => Self::Single,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Pages => "pages",
            Self::Slides => "slides",
        }
    }
}

/// Per-task import options collected from the upload form
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportOptions {
    /// OCR requested by the user
    pub ocr: bool,
    /// Note grouping mode
    pub mode: ImportMode,
}

impl ImportOptions {
    /// Build options from raw form fields (`ocr`, `mode`)
    pub fn from_form(ocr: Option<&str>, mode: Option<&str>) -> Self {
        Self {
            ocr: matches!(ocr.map(str::trim), Some("1") | Some("true")),
            mode: mode.map(ImportMode::parse_lossy).unwrap_or_default(),
        }
    }
}

/// Document formats the worker knows how to import
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pptx,
    Pdf,
}

impl DocumentFormat {
    /// Detect the format from the lowercase extension of a filename
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "pptx" => Ok(Self::Pptx),
            "pdf" => Ok(Self::Pdf),
            "" => Err(Error::UnsupportedFileType("(no extension)".to_string())),
            _ => Err(Error::UnsupportedFileType(ext)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pptx => "pptx",
            Self::Pdf => "pdf",
        }
    }
}

/// Lifecycle state of a stored task.
///
/// Results and errors only exist on the variants that can carry them.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Queued,
    Active,
    Completed { result: ImportResult },
    Failed { error: String },
}

impl TaskState {
    /// Completed and failed tasks never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Status as reported over the wire
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Queued => TaskStatus::Queued,
            Self::Active => TaskStatus::Active,
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// Normalized task status reported by the status endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Failed,
    /// No such task (or not visible to the caller)
    NotFound,
    /// The lookup itself failed
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }

    /// `completed` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A task as submitted by the upload endpoint
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Acting user, when authentication is enabled
    pub owner: Option<String>,
    /// Uploaded file, owned by the task from now on
    pub scratch: ScratchHandle,
    pub original_filename: String,
    pub file_size: u64,
    /// SHA-256 of the uploaded bytes (hex)
    pub content_hash: String,
    pub options: ImportOptions,
}

/// A stored import task
#[derive(Debug, Clone)]
pub struct ImportTask {
    pub id: TaskId,
    pub owner: Option<String>,
    pub scratch: ScratchHandle,
    pub original_filename: String,
    pub file_size: u64,
    pub content_hash: String,
    pub options: ImportOptions,
    pub state: TaskState,
    /// Percentage, never decreases
    pub progress: u8,
    /// Number of times a worker claimed this task
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while a worker holds the task
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl ImportTask {
    /// Detect the document format from the original filename
    pub fn format(&self) -> Result<DocumentFormat> {
        DocumentFormat::from_filename(&self.original_filename)
    }

    /// Whether `user` may see this task. Unowned tasks are visible to everyone.
    pub fn visible_to(&self, user: Option<&str>) -> bool {
        match &self.owner {
            None => true,
            Some(owner) => user == Some(owner.as_str()),
        }
    }
}
