//! Helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use notes_import::{
    error::{Error, Result},
    processing::{QueueClient, Recovery, SqliteJobQueue},
    storage::ScratchStore,
    types::{ImportResult, ImportTask, NewTask, QueueStats},
    TaskId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "----notes-import-test-boundary";

/// One part of a multipart/form-data body
pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

pub fn file<'a>(filename: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "file",
        filename,
        data,
    }
}

pub fn text<'a>(name: &'a str, value: &'a str) -> Part<'a> {
    Part::Text { name, value }
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                name,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Scratch root in a temp dir; keep the `TempDir` alive for the test
pub fn scratch() -> (tempfile::TempDir, ScratchStore) {
    let root = tempfile::tempdir().unwrap();
    let store = ScratchStore::new(root.path()).unwrap();
    (root, store)
}

pub fn scratch_entries(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

/// Which operations of [`ScriptedQueue`] fail
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub enqueue: bool,
    pub get: bool,
}

/// Wraps a real queue, injects faults and records every progress report
pub struct ScriptedQueue {
    inner: SqliteJobQueue,
    faults: Faults,
    progress: Mutex<HashMap<TaskId, Vec<u8>>>,
}

impl ScriptedQueue {
    pub fn new(inner: SqliteJobQueue, faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults,
            progress: Mutex::new(HashMap::new()),
        })
    }

    pub fn in_memory(faults: Faults) -> Arc<Self> {
        Self::new(SqliteJobQueue::in_memory("importQueue").unwrap(), faults)
    }

    /// Progress values reported for `id`, in order
    pub fn progress_of(&self, id: &TaskId) -> Vec<u8> {
        self.progress.lock().get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl QueueClient for ScriptedQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn enqueue(&self, task: NewTask) -> Result<TaskId> {
        if self.faults.enqueue {
            return Err(Error::queue("queue unavailable"));
        }
        self.inner.enqueue(task).await
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ImportTask>> {
        self.inner.claim(worker_id, lease).await
    }

    async fn report_progress(
        &self,
        id: &TaskId,
        worker_id: &str,
        progress: u8,
        lease: Duration,
    ) -> Result<bool> {
        self.progress
            .lock()
            .entry(id.clone())
            .or_default()
            .push(progress);
        self.inner.report_progress(id, worker_id, progress, lease).await
    }

    async fn complete(&self, id: &TaskId, worker_id: &str, result: &ImportResult) -> Result<bool> {
        self.inner.complete(id, worker_id, result).await
    }

    async fn fail(&self, id: &TaskId, worker_id: &str, error: &str) -> Result<bool> {
        self.inner.fail(id, worker_id, error).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<ImportTask>> {
        if self.faults.get {
            return Err(Error::queue("database is locked"));
        }
        self.inner.get(id).await
    }

    async fn recover_expired(&self, max_attempts: u32) -> Result<Recovery> {
        self.inner.recover_expired(max_attempts).await
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<usize> {
        self.inner.purge_finished(older_than).await
    }

    async fn live_scratch_dirs(&self) -> Result<Vec<PathBuf>> {
        self.inner.live_scratch_dirs().await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.inner.stats().await
    }
}
