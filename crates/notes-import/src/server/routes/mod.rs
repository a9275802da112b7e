//! API routes for the import server

pub mod import;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // Upload - with larger body limit for file uploads
        .route(
            "/import",
            post(import::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/import/stats", get(import::stats))
        .route("/import/:job_id/status", get(import::status))
        // Info
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "notes-import",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Asynchronous PPTX/PDF import into notes",
        "endpoints": {
            "POST /api/import": "Upload one document (multipart: file, ocr, mode)",
            "GET /api/import/:jobId/status": "Import task status, progress and result",
            "GET /api/import/stats": "Queue counts per status"
        },
        "formats": ["pptx", "pdf"],
        "modes": ["single", "pages", "slides"]
    }))
}
