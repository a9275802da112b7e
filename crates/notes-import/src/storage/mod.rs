//! Storage module for persistent data storage
//!
//! SQLite connection setup shared by the job queue and the local note store,
//! plus per-upload scratch directories.

pub mod database;
mod scratch;

pub use scratch::{
    sanitize_filename, ScratchHandle, ScratchLease, ScratchStore, ScratchUpload,
    SCRATCH_DIR_PREFIX,
};
