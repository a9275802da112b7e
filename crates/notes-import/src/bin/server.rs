//! Import server binary
//!
//! Run with: cargo run -p notes-import --bin notes-import-server

use notes_import::{
    config::ImportConfig,
    server::{shutdown_signal, ImportServer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notes_import=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                    Notes Import Server                    ║
║          PPTX / PDF uploads into local-first notes        ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    // Load configuration
    let config = ImportConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Queue: {} ({})", config.queue.name, config.queue.path.display());
    tracing::info!("  - Scratch: {}", config.scratch.dir.display());
    tracing::info!("  - Max upload: {} bytes", config.server.max_upload_bytes);
    tracing::info!(
        "  - Auth: {}",
        if config.auth.enabled() { "bearer tokens" } else { "disabled" }
    );

    let server = ImportServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/import                - Upload a document");
    println!("  GET  /api/import/:jobId/status  - Poll an import");
    println!("  GET  /api/import/stats          - Queue counts");
    println!("\nStart one or more notes-import-worker processes to process uploads.");
    println!("Press Ctrl+C to stop\n");

    server.start(shutdown_signal()).await?;

    Ok(())
}
