//! Application state for the import server

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::ImportConfig;
use crate::error::Result;
use crate::processing::{QueueClient, SqliteJobQueue};
use crate::server::auth::{self, Authenticator};
use crate::storage::ScratchStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: ImportConfig,
    /// Job queue shared with the workers
    queue: Arc<dyn QueueClient>,
    /// Per-upload scratch directories
    scratch: ScratchStore,
    /// Resolves the acting user of a request
    authenticator: Box<dyn Authenticator>,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    /// Open the queue and scratch storage named by `config`
    pub fn open(config: ImportConfig) -> Result<Self> {
        tracing::info!(
            "Opening queue {} at {}",
            config.queue.name,
            config.queue.path.display()
        );
        let queue = Arc::new(SqliteJobQueue::open(&config.queue.path, &config.queue.name)?);
        let scratch = ScratchStore::new(&config.scratch.dir)?;
        tracing::info!("Scratch storage at {}", scratch.root().display());

        Ok(Self::new(config, queue, scratch))
    }

    /// Build state from already opened collaborators
    pub fn new(config: ImportConfig, queue: Arc<dyn QueueClient>, scratch: ScratchStore) -> Self {
        let authenticator = auth::from_config(&config.auth);
        Self::with_authenticator(config, queue, scratch, authenticator)
    }

    pub fn with_authenticator(
        config: ImportConfig,
        queue: Arc<dyn QueueClient>,
        scratch: ScratchStore,
        authenticator: Box<dyn Authenticator>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                queue,
                scratch,
                authenticator,
                ready: RwLock::new(true),
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &Arc<dyn QueueClient> {
        &self.inner.queue
    }

    pub fn scratch(&self) -> &ScratchStore {
        &self.inner.scratch
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.inner.authenticator.as_ref()
    }

    /// Check if ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
