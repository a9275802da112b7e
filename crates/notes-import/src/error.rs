//! Error types for the import pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, Error>;

/// Import pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad upload request (no file, malformed multipart, too many files)
    #[error("{0}")]
    ClientInput(String),

    /// Missing or unknown credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The queue refused or could not store a new task
    #[error("Failed to enqueue import task: {0}")]
    Enqueue(String),

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// File parsing error (collaborator failure or malformed document)
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// A bounded operation ran out of time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Queue bookkeeping error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Client-side transport failure talking to the import server
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a client input error
    pub fn client_input(message: impl Into<String>) -> Self {
        Self::ClientInput(message.into())
    }

    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::ClientInput(msg) => (StatusCode::BAD_REQUEST, "client_input", msg.clone()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            Error::Enqueue(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "enqueue_error",
                "failed to queue job".to_string(),
            ),
            Error::UnsupportedFileType(_) => {
                (StatusCode::BAD_REQUEST, "unsupported_type", self.to_string())
            }
            Error::FileParse { .. } => (StatusCode::BAD_REQUEST, "parse_error", self.to_string()),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg.clone()),
            Error::Queue(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "queue_error", msg.clone()),
            Error::Transport(msg) => (StatusCode::BAD_GATEWAY, "transport_error", msg.clone()),
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                err.to_string(),
            ),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": error_type,
        }));

        (status, body).into_response()
    }
}
