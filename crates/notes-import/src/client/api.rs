//! HTTP client for the import endpoints

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::poll::StatusSource;
use crate::error::{Error, Result};
use crate::types::{ImportOptions, StatusResponse, TaskId, UploadResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to a running import server
#[derive(Clone)]
pub struct ImportClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ImportClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Upload a document and return the id of the queued task
    pub async fn upload(&self, path: &Path, options: ImportOptions) -> Result<TaskId> {
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::debug!("Uploading {} ({} bytes)", filename, data.len());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(filename),
            )
            .text("ocr", if options.ocr { "1" } else { "0" })
            .text("mode", options.mode.as_str());

        let request = self
            .client
            .post(format!("{}/api/import", self.base_url))
            .multipart(form);
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Error::transport(format!("upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(rejection(status, message));
        }

        let queued: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("invalid upload response: {}", e)))?;
        Ok(queued.job_id)
    }

    /// Fetch one status snapshot
    pub async fn status(&self, id: &TaskId) -> Result<StatusResponse> {
        let request = self
            .client
            .get(format!("{}/api/import/{}/status", self.base_url, id));
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Error::transport(format!("status request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!("status request returned {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::transport(format!("invalid status response: {}", e)))
    }
}

fn rejection(status: StatusCode, message: String) -> Error {
    let message = format!("server returned {}: {}", status.as_u16(), message);
    if status == StatusCode::UNAUTHORIZED {
        Error::Unauthorized(message)
    } else if status.is_client_error() {
        Error::client_input(message)
    } else {
        Error::transport(message)
    }
}

#[async_trait]
impl StatusSource for ImportClient {
    async fn fetch_status(&self, id: &TaskId) -> Result<StatusResponse> {
        self.status(id).await
    }
}
