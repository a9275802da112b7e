//! HTTP server for the import pipeline

pub mod auth;
pub mod routes;
pub mod state;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ImportConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Import HTTP server
pub struct ImportServer {
    config: ImportConfig,
    state: AppState,
}

impl ImportServer {
    /// Open the queue and scratch storage and create the server
    pub fn new(config: ImportConfig) -> Result<Self> {
        let state = AppState::open(config.clone())?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then close the queue
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = build_router(self.state.clone());

        tracing::info!("Starting import server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        self.state.set_ready(false);
        self.state.queue().close().await
    }

    /// Get the server address
    pub fn address(&self) -> String {
        self.config.address()
    }
}

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    let cors = if state.config().server.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let max_upload_bytes = state.config().server.max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .nest("/api", routes::api_routes(max_upload_bytes))
        .with_state(state)
        // Middleware layers (order matters - applied bottom to top)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// Resolves on Ctrl-C (and SIGTERM on unix)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(state: axum::extract::State<AppState>) -> axum::http::StatusCode {
    if state.is_ready() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }
}
