//! Import worker binary
//!
//! Run with: cargo run -p notes-import --bin notes-import-worker

use std::sync::Arc;

use notes_import::{
    config::ImportConfig,
    ingestion::{slide_parser::HEALTH_CHECK_TIMEOUT, HttpSlideParser},
    processing::{ImportWorker, SqliteJobQueue},
    server::shutdown_signal,
    storage::ScratchStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notes_import=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ImportConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Queue: {} ({})", config.queue.name, config.queue.path.display());
    tracing::info!("  - Scratch: {}", config.scratch.dir.display());
    tracing::info!("  - Slide parser: {}", config.parser.base_url);

    let queue = Arc::new(SqliteJobQueue::open(&config.queue.path, &config.queue.name)?);
    let scratch = ScratchStore::new(&config.scratch.dir)?;
    let parser = Arc::new(HttpSlideParser::new(&config.parser)?);

    // Check the parsing collaborator
    match parser.health_check(HEALTH_CHECK_TIMEOUT).await {
        Ok(_) => tracing::info!("Slide parser reachable at {}", config.parser.base_url),
        Err(e) => {
            tracing::warn!("Slide parser not reachable at {}: {}", config.parser.base_url, e);
            tracing::warn!("PPTX imports will fail until it is started");
        }
    }

    let worker = Arc::new(ImportWorker::new(&config, queue, parser, scratch));
    worker.run(shutdown_signal()).await?;

    tracing::info!("Worker stopped");
    Ok(())
}
