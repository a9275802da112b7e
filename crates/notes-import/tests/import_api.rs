//! HTTP-level tests of the import endpoints, driven through the router

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower::ServiceExt;

use common::{file, multipart_body, multipart_content_type, scratch, scratch_entries, text, Faults, ScriptedQueue};
use notes_import::{
    config::ImportConfig,
    processing::QueueClient,
    server::{build_router, state::AppState},
    types::{ImportMode, ImportResult, NoteDraft, TaskState},
    TaskId,
};

struct TestApp {
    router: Router,
    queue: Arc<ScriptedQueue>,
    scratch_root: tempfile::TempDir,
}

fn app_with(faults: Faults, config: ImportConfig) -> TestApp {
    let (scratch_root, store) = scratch();
    let queue = ScriptedQueue::in_memory(faults);
    let state = AppState::new(config, queue.clone(), store);
    TestApp {
        router: build_router(state),
        queue,
        scratch_root,
    }
}

fn app() -> TestApp {
    app_with(Faults::default(), ImportConfig::default())
}

fn upload_request(parts: &[common::Part<'_>], token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/import")
        .header(header::CONTENT_TYPE, multipart_content_type());
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn status_of(router: &Router, job_id: &str, token: Option<&str>) -> Value {
    let (status, body) = send(
        router,
        get_request(&format!("/api/import/{}/status", job_id), token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn test_upload_queues_task_with_options() {
    let app = app();
    let request = upload_request(
        &[
            text("ocr", "1"),
            text("mode", "pages"),
            file("deck.pptx", b"pptx bytes"),
        ],
        None,
    );

    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let task = app.queue.get(&TaskId::from(job_id.as_str())).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
    assert_eq!(task.original_filename, "deck.pptx");
    assert_eq!(task.file_size, 10);
    assert!(task.options.ocr);
    assert_eq!(task.options.mode, ImportMode::Pages);
    assert_eq!(std::fs::read(&task.scratch.file).unwrap(), b"pptx bytes");
    assert_eq!(scratch_entries(app.scratch_root.path()), vec![task.scratch.dir.clone()]);

    let body = status_of(&app.router, &job_id, None).await;
    assert_eq!(body["jobId"], job_id.as_str());
    assert_eq!(body["status"], "queued");
    assert_eq!(body["progress"], 0);
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn test_options_default_to_single_without_ocr() {
    let app = app();
    let request = upload_request(
        &[file("report.pdf", b"%PDF"), text("mode", "weird"), text("ocr", "yes")],
        None,
    );

    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let id = TaskId::from(body["jobId"].as_str().unwrap());
    let task = app.queue.get(&id).await.unwrap().unwrap();
    assert!(!task.options.ocr);
    assert_eq!(task.options.mode, ImportMode::Single);
}

#[tokio::test]
async fn test_upload_without_file_is_rejected() {
    let app = app();
    let (status, body) = send(&app.router, upload_request(&[text("mode", "pages")], None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "no file");
    assert!(scratch_entries(app.scratch_root.path()).is_empty());
    assert_eq!(app.queue.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_malformed_multipart_is_rejected() {
    let app = app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/import")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("multipart parse error"));

    // body cut off in the middle of the file part
    let mut truncated = multipart_body(&[file("deck.pptx", b"0123456789")]);
    truncated.truncate(truncated.len() - 30);
    let request = Request::builder()
        .method("POST")
        .uri("/api/import")
        .header(header::CONTENT_TYPE, multipart_content_type())
        .body(Body::from(truncated))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(scratch_entries(app.scratch_root.path()).is_empty());
}

#[tokio::test]
async fn test_second_file_part_is_rejected_and_cleaned_up() {
    let app = app();
    let request = upload_request(
        &[file("a.pptx", b"first"), file("b.pptx", b"second")],
        None,
    );

    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("one file"));
    assert!(scratch_entries(app.scratch_root.path()).is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_removes_scratch() {
    let app = app_with(
        Faults {
            enqueue: true,
            ..Faults::default()
        },
        ImportConfig::default(),
    );

    let (status, body) = send(&app.router, upload_request(&[file("deck.pptx", b"data")], None)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to queue job");
    assert_ne!(body["error"], "no file");
    assert!(scratch_entries(app.scratch_root.path()).is_empty());
}

#[tokio::test]
async fn test_status_of_unknown_job_is_not_found() {
    let app = app();
    let body = status_of(&app.router, "does-not-exist", None).await;

    assert_eq!(body["jobId"], "does-not-exist");
    assert_eq!(body["status"], "not_found");
    assert_eq!(body["progress"], 0);
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn test_status_lookup_failure_is_error_not_not_found() {
    let app = app_with(
        Faults {
            get: true,
            ..Faults::default()
        },
        ImportConfig::default(),
    );
    let body = status_of(&app.router, "some-job", None).await;

    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("database is locked"));
}

#[tokio::test]
async fn test_completed_status_carries_notes_only() {
    let app = app();
    let (_, body) = send(&app.router, upload_request(&[file("deck.pptx", b"x")], None)).await;
    let id = TaskId::from(body["jobId"].as_str().unwrap());

    app.queue.claim("w1", std::time::Duration::from_secs(60)).await.unwrap();
    let result = ImportResult {
        created_note_ids: vec!["note-pptx-1700000000000-0".to_string()],
        notes: vec![NoteDraft::new("Imported slides", "x\n\n---\n\ny")],
    };
    assert!(app.queue.complete(&id, "w1", &result).await.unwrap());

    let body = status_of(&app.router, id.as_str(), None).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["result"]["notes"][0]["title"], "Imported slides");
    assert_eq!(body["result"]["notes"][0]["body"], "x\n\n---\n\ny");
    assert!(!body.to_string().contains("note-pptx-1700000000000-0"));

    let (status, stats) = send(&app.router, get_request("/api/import/stats", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn test_concurrent_uploads_use_distinct_scratch_dirs() {
    let app = app();
    let mut uploads = tokio::task::JoinSet::new();

    for i in 0..8 {
        let router = app.router.clone();
        uploads.spawn(async move {
            let content = format!("deck {}", i);
            let request = upload_request(&[file("same-name.pptx", content.as_bytes())], None);
            send(&router, request).await
        });
    }

    let mut dirs = HashSet::new();
    let mut files = HashSet::new();
    while let Some(joined) = uploads.join_next().await {
        let (status, body) = joined.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        let task = app
            .queue
            .get(&TaskId::from(body["jobId"].as_str().unwrap()))
            .await
            .unwrap()
            .unwrap();
        dirs.insert(task.scratch.dir.clone());
        files.insert(task.scratch.file.clone());
    }

    assert_eq!(dirs.len(), 8);
    assert_eq!(files.len(), 8);
    assert_eq!(scratch_entries(app.scratch_root.path()).len(), 8);
}

#[tokio::test]
async fn test_bearer_tokens_gate_and_scope_tasks() {
    let mut config = ImportConfig::default();
    config.auth.tokens = HashMap::from([
        ("alice-token".to_string(), "alice".to_string()),
        ("bob-token".to_string(), "bob".to_string()),
    ]);
    let app = app_with(Faults::default(), config);

    let (status, body) = send(&app.router, upload_request(&[file("deck.pptx", b"x")], None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
    assert!(scratch_entries(app.scratch_root.path()).is_empty());

    let (status, _) = send(
        &app.router,
        upload_request(&[file("deck.pptx", b"x")], Some("wrong")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app.router,
        upload_request(&[file("deck.pptx", b"x")], Some("alice-token")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let task = app.queue.get(&TaskId::from(job_id.as_str())).await.unwrap().unwrap();
    assert_eq!(task.owner.as_deref(), Some("alice"));

    assert_eq!(status_of(&app.router, &job_id, Some("alice-token")).await["status"], "queued");
    assert_eq!(status_of(&app.router, &job_id, Some("bob-token")).await["status"], "not_found");

    let (status, _) = send(
        &app.router,
        get_request(&format!("/api/import/{}/status", job_id), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // health stays open
    let response = app
        .router
        .clone()
        .oneshot(get_request("/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_info_and_readiness() {
    let app = app();

    let (status, body) = send(&app.router, get_request("/api/info", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "notes-import");
    assert!(body["endpoints"]["POST /api/import"].is_string());

    let response = app
        .router
        .clone()
        .oneshot(get_request("/ready", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
