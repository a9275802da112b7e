//! Durable job queue for import tasks
//!
//! The queue is the source of truth for task state. Both the server process
//! (enqueue, lookups) and the worker processes (claim, progress, terminal
//! state) go through [`QueueClient`]; nothing else shares task state.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::database::{self, parse_timestamp, timestamp, SharedConnection};
use crate::storage::ScratchHandle;
use crate::types::{
    ImportMode, ImportOptions, ImportResult, ImportTask, NewTask, QueueStats, TaskId, TaskState,
};

/// Tasks taken back from workers whose lease ran out
#[derive(Debug, Default)]
pub struct Recovery {
    /// Put back in the queue for another attempt
    pub requeued: Vec<TaskId>,
    /// Failed for good; their scratch directories must be released
    pub abandoned: Vec<ImportTask>,
}

/// Operations shared by the upload endpoint, the status endpoint and the worker.
///
/// Worker-side writes (`report_progress`, `complete`, `fail`) name the worker
/// that claimed the task. They are refused once that worker no longer holds
/// it: the task finished, its lease was recovered, or another worker claimed it.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Queue name for logging
    fn name(&self) -> &str;

    /// Store a new task in `queued` state
    async fn enqueue(&self, task: NewTask) -> Result<TaskId>;

    /// Atomically move the oldest queued task to `active` and hand it to `worker_id`
    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ImportTask>>;

    /// Raise progress (never lowers it) and extend the lease. Returns `false`
    /// if `worker_id` no longer holds the task.
    async fn report_progress(
        &self,
        id: &TaskId,
        worker_id: &str,
        progress: u8,
        lease: Duration,
    ) -> Result<bool>;

    /// Record success. Returns `false` if `worker_id` no longer holds the task.
    async fn complete(&self, id: &TaskId, worker_id: &str, result: &ImportResult) -> Result<bool>;

    /// Record failure. Returns `false` if `worker_id` no longer holds the task.
    async fn fail(&self, id: &TaskId, worker_id: &str, error: &str) -> Result<bool>;

    /// Current snapshot of a task
    async fn get(&self, id: &TaskId) -> Result<Option<ImportTask>>;

    /// Requeue active tasks with an expired lease; fail those out of attempts
    async fn recover_expired(&self, max_attempts: u32) -> Result<Recovery>;

    /// Delete terminal tasks finished more than `older_than` ago
    async fn purge_finished(&self, older_than: Duration) -> Result<usize>;

    /// Scratch directories still referenced by queued or active tasks
    async fn live_scratch_dirs(&self) -> Result<Vec<PathBuf>>;

    /// Task counts per status
    async fn stats(&self) -> Result<QueueStats>;

    /// Flush and release the underlying transport
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

const TASK_COLUMNS: &str = "id, owner, scratch_dir, source_path, original_filename, file_size, \
     content_hash, ocr, mode, status, progress, result, error, attempts, created_at, updated_at, \
     lease_expires_at";

/// SQLite-backed queue, shared between processes through the database file.
///
/// Statements run on the blocking thread pool; a busy database never stalls
/// the async executor.
pub struct SqliteJobQueue {
    name: String,
    conn: SharedConnection,
}

impl SqliteJobQueue {
    /// Open (creating if needed) the named queue stored at `path`
    pub fn open(path: &Path, name: impl Into<String>) -> Result<Self> {
        let conn = database::open(path)?;
        Self::with_connection(conn, name.into())
    }

    /// Queue backed by an in-memory database
    pub fn in_memory(name: impl Into<String>) -> Result<Self> {
        let conn = database::open_in_memory()?;
        Self::with_connection(conn, name.into())
    }

    fn with_connection(conn: Connection, name: String) -> Result<Self> {
        let queue = Self {
            name,
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.migrate()?;
        Ok(queue)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS import_tasks (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                owner TEXT,
                scratch_dir TEXT NOT NULL,
                source_path TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                ocr INTEGER NOT NULL,
                mode TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                worker_id TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_import_tasks_claim
                ON import_tasks(queue, status, created_at);
        "#,
        )?;
        Ok(())
    }

    /// Run `f` on the blocking pool with the connection and this queue's name
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
    {
        let name = self.name.clone();
        database::call(&self.conn, move |conn| f(conn, &name)).await
    }

    fn select_task(conn: &Connection, queue: &str, id: &str) -> Result<Option<ImportTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM import_tasks WHERE queue = ?1 AND id = ?2");
        let task = conn
            .query_row(&sql, params![queue, id], row_to_task)
            .optional()?;
        Ok(task)
    }
}

#[async_trait]
impl QueueClient for SqliteJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, task: NewTask) -> Result<TaskId> {
        let id = TaskId::generate();
        let task_id = id.clone();

        self.call(move |conn, queue| {
            let now = timestamp(Utc::now());
            conn.execute(
                r#"INSERT INTO import_tasks (
                    id, queue, owner, scratch_dir, source_path, original_filename, file_size,
                    content_hash, ocr, mode, status, progress, attempts, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'queued', 0, 0, ?11, ?11)"#,
                params![
                    task_id.as_str(),
                    queue,
                    task.owner,
                    task.scratch.dir.to_string_lossy(),
                    task.scratch.file.to_string_lossy(),
                    task.original_filename,
                    task.file_size as i64,
                    task.content_hash,
                    task.options.ocr,
                    task.options.mode.as_str(),
                    now,
                ],
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!("Enqueued task {} on {}", id, self.name);
        Ok(id)
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ImportTask>> {
        let worker_id = worker_id.to_string();

        self.call(move |conn, queue| {
            let now = Utc::now();
            let expires = timestamp(now + to_chrono(lease));
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let id: Option<String> = tx
                .query_row(
                    "SELECT id FROM import_tasks WHERE queue = ?1 AND status = 'queued' \
                     ORDER BY created_at, rowid LIMIT 1",
                    params![queue],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = id else {
                tx.commit()?;
                return Ok(None);
            };

            tx.execute(
                "UPDATE import_tasks SET status = 'active', attempts = attempts + 1, \
                 worker_id = ?2, lease_expires_at = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, worker_id, expires, timestamp(now)],
            )?;
            let task = Self::select_task(&tx, queue, &id)?;
            tx.commit()?;

            Ok(task)
        })
        .await
    }

    async fn report_progress(
        &self,
        id: &TaskId,
        worker_id: &str,
        progress: u8,
        lease: Duration,
    ) -> Result<bool> {
        let id = id.clone();
        let worker_id = worker_id.to_string();

        self.call(move |conn, queue| {
            let now = Utc::now();
            let updated = conn.execute(
                "UPDATE import_tasks SET progress = MAX(progress, ?2), lease_expires_at = ?3, \
                 updated_at = ?4 \
                 WHERE queue = ?5 AND id = ?1 AND status = 'active' AND worker_id = ?6",
                params![
                    id.as_str(),
                    progress.min(100),
                    timestamp(now + to_chrono(lease)),
                    timestamp(now),
                    queue,
                    worker_id,
                ],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn complete(&self, id: &TaskId, worker_id: &str, result: &ImportResult) -> Result<bool> {
        let id = id.clone();
        let worker_id = worker_id.to_string();
        let result = serde_json::to_string(result)?;

        self.call(move |conn, queue| {
            let now = timestamp(Utc::now());
            let updated = conn.execute(
                "UPDATE import_tasks SET status = 'completed', progress = 100, result = ?2, \
                 error = NULL, worker_id = NULL, lease_expires_at = NULL, updated_at = ?3, \
                 finished_at = ?3 \
                 WHERE queue = ?4 AND id = ?1 AND status = 'active' AND worker_id = ?5",
                params![id.as_str(), result, now, queue, worker_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn fail(&self, id: &TaskId, worker_id: &str, error: &str) -> Result<bool> {
        let id = id.clone();
        let worker_id = worker_id.to_string();
        let error = error.to_string();

        self.call(move |conn, queue| {
            let now = timestamp(Utc::now());
            let updated = conn.execute(
                "UPDATE import_tasks SET status = 'failed', error = ?2, result = NULL, \
                 worker_id = NULL, lease_expires_at = NULL, updated_at = ?3, finished_at = ?3 \
                 WHERE queue = ?4 AND id = ?1 AND status = 'active' AND worker_id = ?5",
                params![id.as_str(), error, now, queue, worker_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<ImportTask>> {
        let id = id.clone();
        self.call(move |conn, queue| Self::select_task(conn, queue, id.as_str()))
            .await
    }

    async fn recover_expired(&self, max_attempts: u32) -> Result<Recovery> {
        self.call(move |conn, queue| {
            let now = timestamp(Utc::now());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let expired: Vec<ImportTask> = {
                let sql = format!(
                    "SELECT {TASK_COLUMNS} FROM import_tasks WHERE queue = ?1 \
                     AND status = 'active' AND lease_expires_at IS NOT NULL \
                     AND lease_expires_at < ?2"
                );
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(params![queue, now], row_to_task)?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut recovery = Recovery::default();
            for task in expired {
                if task.attempts >= max_attempts {
                    let error = format!("abandoned after {} attempts", task.attempts);
                    tx.execute(
                        "UPDATE import_tasks SET status = 'failed', error = ?2, worker_id = NULL, \
                         lease_expires_at = NULL, updated_at = ?3, finished_at = ?3 WHERE id = ?1",
                        params![task.id.as_str(), error, now],
                    )?;
                    tracing::warn!("Task {} {}", task.id, error);
                    recovery.abandoned.push(ImportTask {
                        state: TaskState::Failed { error },
                        lease_expires_at: None,
                        ..task
                    });
                } else {
                    tx.execute(
                        "UPDATE import_tasks SET status = 'queued', worker_id = NULL, \
                         lease_expires_at = NULL, updated_at = ?2 WHERE id = ?1",
                        params![task.id.as_str(), now],
                    )?;
                    tracing::warn!(
                        "Task {} lease expired after attempt {}, requeued",
                        task.id,
                        task.attempts
                    );
                    recovery.requeued.push(task.id);
                }
            }

            tx.commit()?;
            Ok(recovery)
        })
        .await
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<usize> {
        self.call(move |conn, queue| {
            let cutoff = timestamp(Utc::now() - to_chrono(older_than));
            let deleted = conn.execute(
                "DELETE FROM import_tasks WHERE queue = ?1 AND status IN ('completed', 'failed') \
                 AND finished_at IS NOT NULL AND finished_at < ?2",
                params![queue, cutoff],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn live_scratch_dirs(&self) -> Result<Vec<PathBuf>> {
        self.call(|conn, queue| {
            let mut stmt = conn.prepare(
                "SELECT scratch_dir FROM import_tasks WHERE queue = ?1 \
                 AND status IN ('queued', 'active')",
            )?;
            let dirs = stmt
                .query_map(params![queue], |row| row.get::<_, String>(0))?
                .map(|dir| dir.map(PathBuf::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(dirs)
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.call(|conn, queue| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM import_tasks WHERE queue = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![queue], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row?;
                match status.as_str() {
                    "queued" => stats.queued = count,
                    "active" => stats.active = count,
                    "completed" => stats.completed = count,
                    "failed" => stats.failed = count,
                    other => return Err(Error::queue(format!("unknown task status '{}'", other))),
                }
                stats.total += count;
            }
            Ok(stats)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.call(|conn, _| {
            conn.execute_batch("PRAGMA optimize;")?;
            Ok(())
        })
        .await?;
        tracing::info!("Queue {} closed", self.name);
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn conversion_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn row_to_task(row: &Row) -> rusqlite::Result<ImportTask> {
    let status: String = row.get(9)?;
    let result: Option<String> = row.get(11)?;
    let error: Option<String> = row.get(12)?;

    let state = match status.as_str() {
        "queued" => TaskState::Queued,
        "active" => TaskState::Active,
        "completed" => {
            let result = match result {
                Some(json) => serde_json::from_str(&json).map_err(|e| conversion_error(11, e))?,
                None => ImportResult::default(),
            };
            TaskState::Completed { result }
        }
        "failed" => TaskState::Failed {
            error: error.unwrap_or_default(),
        },
        other => {
            return Err(conversion_error(
                9,
                Error::queue(format!("unknown task status '{}'", other)),
            ))
        }
    };

    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;
    let lease_expires_at: Option<String> = row.get(16)?;
    let mode: String = row.get(8)?;

    Ok(ImportTask {
        id: TaskId::from(row.get::<_, String>(0)?),
        owner: row.get(1)?,
        scratch: ScratchHandle::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        original_filename: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        content_hash: row.get(6)?,
        options: ImportOptions {
            ocr: row.get(7)?,
            mode: ImportMode::parse_lossy(&mode),
        },
        state,
        progress: row.get::<_, i64>(10)?.clamp(0, 100) as u8,
        attempts: row.get::<_, i64>(13)?.max(0) as u32,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
        lease_expires_at: lease_expires_at.as_deref().and_then(parse_timestamp),
    })
}

/// Set a task's lease expiry directly (simulates a worker that stopped reporting)
#[cfg(test)]
pub(crate) fn force_lease_expiry(queue: &SqliteJobQueue, id: &TaskId, at: chrono::DateTime<Utc>) {
    let conn = queue.conn.lock();
    conn.execute(
        "UPDATE import_tasks SET lease_expires_at = ?2 WHERE id = ?1",
        params![id.as_str(), timestamp(at)],
    )
    .unwrap();
}
