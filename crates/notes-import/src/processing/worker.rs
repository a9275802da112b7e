//! Import worker: claims queued tasks and turns uploads into note drafts

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, MissedTickBehavior};

use crate::config::{ImportConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::ingestion::{pdf_draft, slides_to_drafts, SlideParser};
use crate::storage::ScratchStore;
use crate::types::{DocumentFormat, ImportResult, ImportTask, NoteDraft, TaskId};

use super::job_queue::QueueClient;

/// Progress reported once the format is known and parsing starts
pub const PROGRESS_STARTED: u8 = 10;
/// Progress reported once parsing returned
pub const PROGRESS_PARSED: u8 = 80;
/// Progress reported once drafts are assembled
pub const PROGRESS_DONE: u8 = 100;

/// Worker for processing import tasks in the background
pub struct ImportWorker {
    id: String,
    queue: Arc<dyn QueueClient>,
    parser: Arc<dyn SlideParser>,
    scratch: ScratchStore,
    config: WorkerConfig,
    parse_timeout: Duration,
}

impl ImportWorker {
    /// Create a new import worker
    pub fn new(
        config: &ImportConfig,
        queue: Arc<dyn QueueClient>,
        parser: Arc<dyn SlideParser>,
        scratch: ScratchStore,
    ) -> Self {
        let id = format!("worker-{}-{}", std::process::id(), uuid::Uuid::new_v4());

        tracing::info!(
            "Worker {} configured: {} concurrent tasks, {}s parse timeout, {}s lease",
            id,
            config.worker.concurrency(),
            config.parser.timeout_secs,
            config.worker.lease_secs
        );

        Self {
            id,
            queue,
            parser,
            scratch,
            config: config.worker.clone(),
            parse_timeout: config.parser.timeout(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process tasks until `shutdown` resolves, then drain in-flight tasks
    /// and close the queue.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut in_flight = JoinSet::new();
        let mut maintenance = tokio::time::interval(self.config.recovery_interval());
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!("Worker {} polling queue {}", self.id, self.queue.name());

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                _ = maintenance.tick() => {
                    self.maintain().await;
                    continue;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Import task panicked: {}", e);
                    }
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| Error::internal("worker semaphore closed"))?,
            };

            match self.queue.claim(&self.id, self.config.lease()).await {
                Ok(Some(task)) => {
                    let worker = Arc::clone(&self);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        worker.process(task).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.config.idle_poll()) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!("Failed to claim from {}: {}", self.queue.name(), e);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.config.idle_poll()) => {}
                    }
                }
            }
        }

        tracing::info!(
            "Worker {} shutting down, waiting for {} in-flight tasks",
            self.id,
            in_flight.len()
        );
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Import task panicked: {}", e);
            }
        }

        self.queue.close().await
    }

    /// Claim and process at most one task. Returns whether a task was processed.
    pub async fn run_once(&self) -> Result<bool> {
        match self.queue.claim(&self.id, self.config.lease()).await? {
            Some(task) => {
                self.process(task).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run one claimed task to a terminal state. Never fails: every error
    /// ends up as the task's `failed` state.
    ///
    /// The scratch directory is released only once the outcome is recorded.
    /// If the queue refuses the outcome, the task now belongs to someone else
    /// (or to lease recovery) and so does its directory.
    async fn process(&self, task: ImportTask) {
        let id = task.id.clone();
        let filename = task.original_filename.clone();
        tracing::info!(
            "[{}] Processing task {} ({} bytes, attempt {})",
            filename,
            id,
            task.file_size,
            task.attempts
        );
        let start_time = std::time::Instant::now();

        let (outcome, lease) = match self.scratch.lease(&task.scratch) {
            Ok(lease) => (self.execute(&task, lease.file()).await, Some(lease)),
            Err(e) => (Err(e), None),
        };

        let elapsed = start_time.elapsed();
        let recorded = match outcome {
            Ok(result) => {
                tracing::info!(
                    "[{}] Task {} completed with {} notes in {:.1}s",
                    filename,
                    id,
                    result.notes.len(),
                    elapsed.as_secs_f64()
                );
                self.queue.complete(&id, &self.id, &result).await
            }
            Err(e) => {
                tracing::error!("[{}] Task {} failed: {}", filename, id, e);
                self.queue.fail(&id, &self.id, &e.to_string()).await
            }
        };

        match (recorded, lease) {
            (Ok(true), Some(lease)) => {
                if let Err(e) = blocking(move || lease.release()).await {
                    tracing::warn!("Failed to release scratch of task {}: {}", id, e);
                }
            }
            (Ok(true), None) => {}
            (Ok(false), lease) => {
                if let Some(lease) = lease {
                    lease.keep();
                }
                tracing::warn!("Task {} is no longer held by {}, outcome dropped", id, self.id);
            }
            (Err(e), lease) => {
                // still active; lease recovery will hand it to another attempt
                if let Some(lease) = lease {
                    lease.keep();
                }
                tracing::error!("Failed to record outcome of task {}: {}", id, e);
            }
        }
    }

    /// Format dispatch, parsing and draft assembly
    async fn execute(&self, task: &ImportTask, file: &Path) -> Result<ImportResult> {
        let format = task.format()?;
        let filename = &task.original_filename;
        let mode = task.options.mode;

        self.report(&task.id, PROGRESS_STARTED).await?;

        let notes: Vec<NoteDraft> = match format {
            DocumentFormat::Pptx => {
                let slides = timeout(
                    self.parse_timeout,
                    self.parser.parse_slides(file, filename, mode),
                )
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "slide parser did not answer within {}s",
                        self.parse_timeout.as_secs()
                    ))
                })??;
                self.report(&task.id, PROGRESS_PARSED).await?;
                slides_to_drafts(&slides, mode)
            }
            DocumentFormat::Pdf => {
                let draft = pdf_draft(file, filename, task.options.ocr, self.parse_timeout).await;
                self.report(&task.id, PROGRESS_PARSED).await?;
                vec![draft]
            }
        };

        self.report(&task.id, PROGRESS_DONE).await?;

        let millis = Utc::now().timestamp_millis();
        let created_note_ids = (0..notes.len())
            .map(|i| format!("note-{}-{}-{}", format.as_str(), millis, i))
            .collect();

        Ok(ImportResult {
            created_note_ids,
            notes,
        })
    }

    /// Report progress. A failed write only costs the update; a refused one
    /// means this worker no longer holds the task and must stop.
    async fn report(&self, id: &TaskId, progress: u8) -> Result<()> {
        match self
            .queue
            .report_progress(id, &self.id, progress, self.config.lease())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::queue(format!(
                "task {} is no longer held by {}",
                id, self.id
            ))),
            Err(e) => {
                tracing::warn!("Failed to report progress {} for task {}: {}", progress, id, e);
                Ok(())
            }
        }
    }

    /// Lease recovery, retention and orphaned scratch sweeps
    pub async fn maintain(&self) {
        match self.queue.recover_expired(self.config.max_attempts).await {
            Ok(recovery) => {
                let scratch = self.scratch.clone();
                let abandoned: Vec<_> = recovery
                    .abandoned
                    .iter()
                    .map(|task| (task.id.clone(), task.scratch.clone()))
                    .collect();
                let released = blocking(move || {
                    for (id, handle) in abandoned {
                        if let Err(e) = scratch.release(&handle) {
                            tracing::warn!("Failed to release scratch of task {}: {}", id, e);
                        }
                    }
                    Ok(())
                })
                .await;
                if let Err(e) = released {
                    tracing::error!("Scratch release failed: {}", e);
                }
                if !recovery.requeued.is_empty() || !recovery.abandoned.is_empty() {
                    tracing::info!(
                        "Recovered expired leases: {} requeued, {} abandoned",
                        recovery.requeued.len(),
                        recovery.abandoned.len()
                    );
                }
            }
            Err(e) => tracing::error!("Lease recovery failed: {}", e),
        }

        match self.queue.purge_finished(self.config.retention()).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Purged {} finished tasks", n),
            Err(e) => tracing::error!("Retention sweep failed: {}", e),
        }

        let live = match self.queue.live_scratch_dirs().await {
            Ok(dirs) => dirs.into_iter().collect::<HashSet<_>>(),
            Err(e) => {
                tracing::error!("Could not list live scratch directories: {}", e);
                return;
            }
        };
        let scratch = self.scratch.clone();
        let grace = self.config.orphan_grace();
        match blocking(move || scratch.sweep_orphans(&live, grace)).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} orphaned scratch directories", n),
            Err(e) => tracing::error!("Orphan sweep failed: {}", e),
        }
    }
}

/// Run filesystem work on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::Slide;
    use crate::processing::job_queue::{force_lease_expiry, SqliteJobQueue};
    use crate::types::{ImportMode, ImportOptions, NewTask, TaskState};
    use async_trait::async_trait;

    struct StaticParser(Vec<Slide>);

    #[async_trait]
    impl SlideParser for StaticParser {
        async fn parse_slides(&self, file: &Path, _: &str, _: ImportMode) -> Result<Vec<Slide>> {
            assert!(file.exists(), "scratch file must exist while parsing");
            Ok(self.0.clone())
        }
    }

    struct FailingParser;

    #[async_trait]
    impl SlideParser for FailingParser {
        async fn parse_slides(&self, _: &Path, filename: &str, _: ImportMode) -> Result<Vec<Slide>> {
            Err(Error::file_parse(filename, "parser request failed: connection refused"))
        }
    }

    /// Lets the lease run out mid-parse: the task is recovered and claimed
    /// by another worker before the parser answers.
    struct HijackingParser {
        queue: Arc<SqliteJobQueue>,
        task: parking_lot::Mutex<Option<TaskId>>,
    }

    #[async_trait]
    impl SlideParser for HijackingParser {
        async fn parse_slides(&self, _: &Path, _: &str, _: ImportMode) -> Result<Vec<Slide>> {
            let id = self.task.lock().clone().expect("task id set before parsing");
            force_lease_expiry(&self.queue, &id, Utc::now() - chrono::Duration::seconds(1));
            self.queue.recover_expired(3).await?;
            self.queue.claim("worker-b", Duration::from_secs(60)).await?;
            Ok(vec![Slide::new(Some("stale"), None)])
        }
    }

    struct Harness {
        _root: tempfile::TempDir,
        queue: Arc<SqliteJobQueue>,
        scratch: ScratchStore,
        worker: ImportWorker,
    }

    fn harness(parser: Arc<dyn SlideParser>) -> Harness {
        harness_on(Arc::new(SqliteJobQueue::in_memory("importQueue").unwrap()), parser)
    }

    fn harness_on(queue: Arc<SqliteJobQueue>, parser: Arc<dyn SlideParser>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchStore::new(root.path()).unwrap();
        let mut config = ImportConfig::default();
        config.worker.max_attempts = 1;
        let worker = ImportWorker::new(&config, queue.clone(), parser, scratch.clone());
        Harness {
            _root: root,
            queue,
            scratch,
            worker,
        }
    }

    async fn enqueue(h: &Harness, filename: &str, mode: ImportMode) -> (TaskId, NewTask) {
        let mut upload = h.scratch.create_upload(filename).await.unwrap();
        upload.write_chunk(b"file contents").await.unwrap();
        upload.finish().await.unwrap();
        let task = NewTask {
            owner: None,
            file_size: upload.size(),
            content_hash: upload.content_hash(),
            scratch: upload.persist(),
            original_filename: filename.to_string(),
            options: ImportOptions { ocr: false, mode },
        };
        let id = h.queue.enqueue(task.clone()).await.unwrap();
        (id, task)
    }

    #[tokio::test]
    async fn test_pptx_task_completes_and_releases_scratch() {
        let slides = vec![
            Slide::new(Some("A"), Some("x")),
            Slide::new(Some("B"), Some("y")),
        ];
        let h = harness(Arc::new(StaticParser(slides)));
        let (id, task) = enqueue(&h, "deck.pptx", ImportMode::Pages).await;

        assert!(h.worker.run_once().await.unwrap());

        let stored = h.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
        match stored.state {
            TaskState::Completed { result } => {
                assert_eq!(result.notes.len(), 2);
                assert_eq!(result.created_note_ids.len(), 2);
                assert!(result.created_note_ids[1].starts_with("note-pptx-"));
                assert!(result.created_note_ids[1].ends_with("-1"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!task.scratch.dir.exists());
        assert!(!h.worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_format_fails() {
        let h = harness(Arc::new(StaticParser(vec![])));
        let (id, task) = enqueue(&h, "notes.docx", ImportMode::Single).await;

        h.worker.run_once().await.unwrap();

        let stored = h.queue.get(&id).await.unwrap().unwrap();
        match stored.state {
            TaskState::Failed { error } => assert!(error.contains("Unsupported file type")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!task.scratch.dir.exists());
    }

    #[tokio::test]
    async fn test_parser_failure_is_recorded() {
        let h = harness(Arc::new(FailingParser));
        let (id, task) = enqueue(&h, "deck.pptx", ImportMode::Single).await;

        h.worker.run_once().await.unwrap();

        let stored = h.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.progress, PROGRESS_STARTED);
        match stored.state {
            TaskState::Failed { error } => assert!(error.contains("connection refused")),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!task.scratch.dir.exists());
    }

    #[tokio::test]
    async fn test_pdf_task_produces_single_draft() {
        let h = harness(Arc::new(FailingParser));
        let (id, _) = enqueue(&h, "report.pdf", ImportMode::Pages).await;

        h.worker.run_once().await.unwrap();

        match h.queue.get(&id).await.unwrap().unwrap().state {
            TaskState::Completed { result } => {
                assert_eq!(result.notes.len(), 1);
                assert_eq!(result.notes[0].title, "report.pdf");
                assert!(result.notes[0]
                    .body
                    .starts_with("Imported PDF \"report.pdf\". OCR requested: no."));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_maintenance_abandons_and_cleans_expired_tasks() {
        let h = harness(Arc::new(StaticParser(vec![])));
        let (id, task) = enqueue(&h, "deck.pptx", ImportMode::Single).await;

        // a worker that claimed the task and then died
        h.queue.claim("crashed", Duration::from_secs(60)).await.unwrap();
        force_lease_expiry(&h.queue, &id, Utc::now() - chrono::Duration::seconds(1));

        h.worker.maintain().await;

        match h.queue.get(&id).await.unwrap().unwrap().state {
            TaskState::Failed { error } => assert_eq!(error, "abandoned after 1 attempts"),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(!task.scratch.dir.exists());
    }

    #[tokio::test]
    async fn test_worker_that_lost_its_task_keeps_scratch() {
        let queue = Arc::new(SqliteJobQueue::in_memory("importQueue").unwrap());
        let parser = Arc::new(HijackingParser {
            queue: queue.clone(),
            task: parking_lot::Mutex::new(None),
        });
        let h = harness_on(queue, parser.clone());
        let (id, task) = enqueue(&h, "deck.pptx", ImportMode::Single).await;
        *parser.task.lock() = Some(id.clone());

        assert!(h.worker.run_once().await.unwrap());

        let stored = h.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Active);
        assert_eq!(stored.attempts, 2);
        assert!(task.scratch.file.exists());

        // the current owner still finishes normally
        let result = ImportResult::default();
        assert!(h.queue.complete(&id, "worker-b", &result).await.unwrap());
        assert_eq!(
            h.queue.get(&id).await.unwrap().unwrap().state,
            TaskState::Completed { result }
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(Arc::new(StaticParser(vec![Slide::new(None, Some("only"))])));
        let (id, _) = enqueue(&h, "deck.pptx", ImportMode::Single).await;
        let worker = Arc::new(h.worker);
        let queue = h.queue.clone();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(worker.run(async {
            let _ = rx.await;
        }));

        for _ in 0..100 {
            if queue.get(&id).await.unwrap().unwrap().state.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(queue.get(&id).await.unwrap().unwrap().state.is_terminal());
    }
}
