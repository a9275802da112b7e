//! Wire types for the import endpoints

use serde::{Deserialize, Serialize};

use super::note::NoteDraft;
use super::task::{ImportTask, TaskId, TaskState, TaskStatus};

/// Response from `POST /api/import`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: TaskId,
    pub status: TaskStatus,
}

impl UploadResponse {
    pub fn queued(job_id: TaskId) -> Self {
        Self {
            job_id,
            status: TaskStatus::Queued,
        }
    }
}

/// Client-visible part of a completed import
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResult {
    pub notes: Vec<NoteDraft>,
}

/// Response from `GET /api/import/:job_id/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    /// Present only for completed tasks
    #[serde(default)]
    pub result: Option<StatusResult>,
    /// Failure message of a failed task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Lookup failure detail when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    /// Snapshot of a stored task
    pub fn from_task(task: &ImportTask) -> Self {
        let (result, error) = match &task.state {
            TaskState::Completed { result } => (
                Some(StatusResult {
                    notes: result.notes.clone(),
                }),
                None,
            ),
            TaskState::Failed { error } => (None, Some(error.clone())),
            TaskState::Queued | TaskState::Active => (None, None),
        };

        Self {
            job_id: task.id.to_string(),
            status: task.state.status(),
            progress: task.progress,
            result,
            error,
            message: None,
        }
    }

    /// No such task
    pub fn not_found(job_id: &TaskId) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: TaskStatus::NotFound,
            progress: 0,
            result: None,
            error: None,
            message: None,
        }
    }

    /// The queue could not be consulted
    pub fn lookup_error(job_id: &TaskId, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: TaskStatus::Error,
            progress: 0,
            result: None,
            error: None,
            message: Some(message.into()),
        }
    }
}

/// Task counts per status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}
