//! Import upload, status and stats endpoints

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{Error, Result};
use crate::server::auth::Actor;
use crate::server::state::AppState;
use crate::storage::ScratchUpload;
use crate::types::{ImportOptions, NewTask, QueueStats, StatusResponse, TaskId, UploadResponse};

fn multipart_error(e: impl std::fmt::Display) -> Error {
    Error::client_input(format!("multipart parse error: {}", e))
}

/// POST /api/import - Upload one document for asynchronous import
///
/// The file part is streamed straight into a fresh scratch directory. The
/// directory is removed again on every failure path.
pub async fn upload(
    State(state): State<AppState>,
    actor: Actor,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut multipart = multipart.map_err(multipart_error)?;
    let mut upload: Option<(ScratchUpload, String)> = None;
    let mut ocr: Option<String> = None;
    let mut mode: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                if upload.is_some() {
                    return Err(Error::client_input("only one file may be uploaded"));
                }
                let filename = field.file_name().unwrap_or("").to_string();
                let mut scratch = state.scratch().create_upload(&filename).await?;

                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    scratch.write_chunk(&chunk).await?;
                }
                scratch.finish().await?;

                tracing::info!("Received upload: {} ({} bytes)", filename, scratch.size());
                upload = Some((scratch, filename));
            }
            "ocr" => ocr = Some(field.text().await.map_err(multipart_error)?),
            "mode" => mode = Some(field.text().await.map_err(multipart_error)?),
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let Some((scratch, filename)) = upload else {
        return Err(Error::client_input("no file"));
    };

    let task = NewTask {
        owner: actor.into_user(),
        scratch: scratch.handle(),
        original_filename: filename,
        file_size: scratch.size(),
        content_hash: scratch.content_hash(),
        options: ImportOptions::from_form(ocr.as_deref(), mode.as_deref()),
    };

    match state.queue().enqueue(task).await {
        Ok(job_id) => {
            scratch.persist();
            tracing::info!("Queued import task {}", job_id);
            Ok((StatusCode::ACCEPTED, Json(UploadResponse::queued(job_id))))
        }
        Err(e) => {
            tracing::error!("Failed to enqueue import: {}", e);
            drop(scratch);
            Err(Error::Enqueue(e.to_string()))
        }
    }
}

/// GET /api/import/:job_id/status - Current snapshot of an import task
pub async fn status(
    State(state): State<AppState>,
    actor: Actor,
    Path(job_id): Path<String>,
) -> Json<StatusResponse> {
    let id = TaskId::from(job_id);

    let response = match state.queue().get(&id).await {
        Ok(Some(task)) if task.visible_to(actor.user()) => StatusResponse::from_task(&task),
        Ok(_) => StatusResponse::not_found(&id),
        Err(e) => {
            tracing::error!("Status lookup for {} failed: {}", id, e);
            StatusResponse::lookup_error(&id, e.to_string())
        }
    };

    Json(response)
}

/// GET /api/import/stats - Queue counts per status
pub async fn stats(State(state): State<AppState>, _actor: Actor) -> Result<Json<QueueStats>> {
    Ok(Json(state.queue().stats().await?))
}
