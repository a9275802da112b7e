//! notes-import: asynchronous PPTX/PDF import for a local-first notes app
//!
//! A client uploads a document to the import server, which streams it into
//! scratch storage and enqueues a task on a durable queue. Import workers
//! claim tasks, delegate slide parsing to an external collaborator (or
//! extract PDF text locally) and record note drafts as the task result. The
//! client polls the status endpoint and materializes the drafts as notes in
//! its local store.

pub mod client;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod server;
pub mod storage;
pub mod types;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use types::{
    ImportMode, ImportOptions, ImportResult, ImportTask, Note, NoteDraft, StatusResponse, TaskId,
    TaskStatus,
};
