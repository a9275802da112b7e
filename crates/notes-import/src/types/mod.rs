//! Core types for the import pipeline

pub mod note;
pub mod response;
pub mod task;

pub use note::{ImportResult, Note, NoteDraft};
pub use response::{QueueStats, StatusResponse, StatusResult, UploadResponse};
pub use task::{
    DocumentFormat, ImportMode, ImportOptions, ImportTask, NewTask, TaskId, TaskState, TaskStatus,
};
