//! Scratch storage for in-flight uploads
//!
//! Every upload gets its own directory under the scratch root, so two uploads
//! never share a path. Ownership of a directory moves in three steps:
//!
//! - [`ScratchUpload`] is held by the upload handler while the file streams in.
//!   Dropping it removes the directory; [`ScratchUpload::persist`] hands the
//!   directory over once the task is safely enqueued.
//! - [`ScratchHandle`] is the plain record stored with the task.
//! - [`ScratchLease`] is held by the worker while it processes the task and
//!   removes the directory when dropped. A worker that lost its claim on the
//!   task calls [`ScratchLease::keep`] instead; the directory then belongs to
//!   whichever worker holds the task now.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Prefix of every per-upload directory
pub const SCRATCH_DIR_PREFIX: &str = "notes-import-";

const FALLBACK_FILENAME: &str = "upload.bin";

/// Location of a persisted upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScratchHandle {
    /// Per-upload directory, removed as a whole on release
    pub dir: PathBuf,
    /// The uploaded file inside `dir`
    pub file: PathBuf,
}

impl ScratchHandle {
    pub fn new(dir: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: file.into(),
        }
    }
}

/// Root directory holding all per-upload scratch directories
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Open (creating if needed) a scratch root
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for one upload and open the target file
    pub async fn create_upload(&self, filename: &str) -> Result<ScratchUpload> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_DIR_PREFIX)
            .tempdir_in(&self.root)?;
        let path = dir.path().join(sanitize_filename(filename));
        let file = tokio::fs::File::create(&path).await?;

        tracing::debug!("Created scratch upload {}", path.display());

        Ok(ScratchUpload {
            file: Some(file),
            path,
            hasher: Sha256::new(),
            size: 0,
            dir,
        })
    }

    /// Take ownership of a task's scratch directory for processing
    pub fn lease(&self, handle: &ScratchHandle) -> Result<ScratchLease> {
        self.check_owned(handle)?;
        Ok(ScratchLease {
            handle: handle.clone(),
            keep: false,
        })
    }

    /// Remove a task's scratch directory right away
    pub fn release(&self, handle: &ScratchHandle) -> Result<()> {
        self.check_owned(handle)?;
        remove_dir(&handle.dir)
    }

    /// Remove scratch directories no live task refers to.
    ///
    /// Only directories older than `grace` are touched, so uploads still
    /// streaming in are left alone.
    pub fn sweep_orphans(&self, live: &HashSet<PathBuf>, grace: Duration) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            let is_scratch_dir = entry.file_type()?.is_dir()
                && entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(SCRATCH_DIR_PREFIX);
            if !is_scratch_dir || live.contains(&path) {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            if modified <= cutoff {
                tracing::warn!("Removing orphaned scratch directory {}", path.display());
                remove_dir(&path)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn check_owned(&self, handle: &ScratchHandle) -> Result<()> {
        let inside = handle.dir.parent() == Some(self.root.as_path())
            && handle.file.starts_with(&handle.dir);
        if inside {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "scratch path {} is outside {}",
                handle.dir.display(),
                self.root.display()
            )))
        }
    }
}

/// An upload being written to scratch storage.
///
/// The directory is deleted on drop unless [`ScratchUpload::persist`] was called.
#[derive(Debug)]
pub struct ScratchUpload {
    // closed before `dir` is removed
    file: Option<tokio::fs::File>,
    path: PathBuf,
    hasher: Sha256,
    size: u64,
    dir: TempDir,
}

impl ScratchUpload {
    /// Append a chunk of the uploaded file
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::internal("scratch upload already finished"))?;
        file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush and close the file
    pub async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// SHA-256 (hex) of the bytes written so far
    pub fn content_hash(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> ScratchHandle {
        ScratchHandle::new(self.dir.path(), &self.path)
    }

    /// Keep the directory on disk; its task now owns it
    pub fn persist(mut self) -> ScratchHandle {
        let handle = self.handle();
        self.file.take();
        let _ = self.dir.keep();
        handle
    }
}

/// Worker-side ownership of a task's scratch directory. Removed on drop
/// unless [`ScratchLease::keep`] was called.
#[derive(Debug)]
pub struct ScratchLease {
    handle: ScratchHandle,
    keep: bool,
}

impl ScratchLease {
    /// Path of the uploaded file
    pub fn file(&self) -> &Path {
        &self.handle.file
    }

    /// Remove the directory now, reporting failures instead of logging them
    pub fn release(mut self) -> Result<()> {
        self.keep = true;
        remove_dir(&self.handle.dir)
    }

    /// Give up the lease without touching the directory
    pub fn keep(mut self) -> ScratchHandle {
        self.keep = true;
        self.handle.clone()
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = remove_dir(&self.handle.dir) {
            tracing::warn!(
                "Failed to remove scratch directory {}: {}",
                self.handle.dir.display(),
                e
            );
        }
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reduce a client-supplied filename to a safe final path component
pub fn sanitize_filename(filename: &str) -> String {
    let last = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();

    match last {
        "" | "." | ".." => FALLBACK_FILENAME.to_string(),
        name => name.to_string(),
    }
}
