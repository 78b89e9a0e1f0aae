//! Integration tests for the labeler HTTP API
//!
//! The session runs against a temporary image directory; outbound payloads
//! are read straight off the dispatcher queues instead of a live trainer.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use labeler::coordinator::{SessionCoordinator, SessionSettings};
use labeler::dispatch::{DispatchQueues, Dispatcher, Payload, Queue};
use labeler::store::{SessionStore, SourceOptions};
use labeler::{build_router, AppState};

struct TestApp {
    _dir: TempDir,
    app: Router,
    queues: DispatchQueues,
    store: SessionStore,
    source: SourceOptions,
}

fn image_dir(dir: &TempDir, images: usize) -> PathBuf {
    let image_dir = dir.path().join("images");
    std::fs::create_dir(&image_dir).unwrap();
    for i in 0..images {
        std::fs::write(image_dir.join(format!("img_{:02}.png", i)), b"png").unwrap();
    }
    image_dir
}

/// Fresh session over `images` files
fn setup_app(images: usize, eval_fraction: f64, buffer_size: usize) -> TestApp {
    let dir = TempDir::new().unwrap();
    let source = SourceOptions {
        image_directory: image_dir(&dir, images),
        eval_fraction,
        seed: Some(42),
    };
    let store = SessionStore::new(dir.path().join("annotations").join("annotations.json"));
    let (app, queues) = start_session(&store, &source, buffer_size);
    TestApp {
        _dir: dir,
        app,
        queues,
        store,
        source,
    }
}

fn start_session(
    store: &SessionStore,
    source: &SourceOptions,
    buffer_size: usize,
) -> (Router, DispatchQueues) {
    let restored = store.open_session(source).unwrap();
    let (dispatcher, queues) = Dispatcher::channels();
    let coordinator = SessionCoordinator::new(
        restored,
        dispatcher,
        SessionSettings { buffer_size },
        Some(store.clone()),
    );
    (build_router(AppState::new(coordinator)), queues)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Should parse JSON")
    };
    (status, body)
}

async fn add_label(app: &Router, name: &str) -> Value {
    let (status, body) = send(app, post_json("/api/labels", json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::OK);
    body
}

async fn next(app: &Router, label: Option<&str>) -> Value {
    let body = match label {
        Some(label) => json!({ "label": label }),
        None => json!({}),
    };
    let (status, body) = send(app, post_json("/api/next", body)).await;
    assert_eq!(status, StatusCode::OK);
    body
}

fn train_sizes(queues: &mut DispatchQueues) -> Vec<usize> {
    queues
        .drain_now(Queue::TrainBatch)
        .into_iter()
        .map(|p| match p {
            Payload::Train(batch) => batch.labelled_data.len(),
            other => panic!("unexpected payload {:?}", other),
        })
        .collect()
}

// =============================================================================
// Health and page
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let t = setup_app(3, 0.0, 5);

    let (status, body) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "labeler");
    assert!(body["version"].is_string());
    assert_eq!(body["phase"], "collecting_labels");
}

#[tokio::test]
async fn test_page_follows_session_phase() {
    let t = setup_app(3, 0.0, 5);

    let (_, page) = send(&t.app, get("/api/page")).await;
    assert_eq!(page, json!({ "page": "collect_labels", "labels": [] }));

    add_label(&t.app, "cat").await;
    next(&t.app, None).await;
    let (_, page) = send(&t.app, get("/api/page")).await;
    assert_eq!(page, json!({ "page": "annotate", "labels": ["cat"] }));

    send(&t.app, post_empty("/api/stop")).await;
    let (_, page) = send(&t.app, get("/api/page")).await;
    assert_eq!(page["page"], "stopped");
}

// =============================================================================
// Labels and next image
// =============================================================================

#[tokio::test]
async fn test_next_without_labels_is_awaiting_labels() {
    let t = setup_app(3, 0.0, 5);

    let body = next(&t.app, None).await;

    assert_eq!(body["kind"], "awaiting_labels");
}

#[tokio::test]
async fn test_blank_and_duplicate_labels_are_ignored() {
    let t = setup_app(3, 0.0, 5);

    add_label(&t.app, "cat").await;
    add_label(&t.app, "   ").await;
    let body = add_label(&t.app, " cat ").await;

    assert_eq!(body["labels"], json!(["cat"]));
}

#[tokio::test]
async fn test_next_accepts_empty_body() {
    let mut t = setup_app(3, 0.0, 5);
    add_label(&t.app, "cat").await;

    let (status, body) = send(&t.app, post_empty("/api/next")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "image");
    assert_eq!(t.queues.drain_now(Queue::Init).len(), 1);
}

#[tokio::test]
async fn test_next_rejects_malformed_body() {
    let t = setup_app(3, 0.0, 5);

    let request = Request::builder()
        .method("POST")
        .uri("/api/next")
        .body(Body::from("{label:"))
        .unwrap();
    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_full_session_over_http() {
    let mut t = setup_app(10, 0.2, 5);
    add_label(&t.app, "cat").await;
    add_label(&t.app, "dog").await;

    let first = next(&t.app, None).await;
    assert_eq!(first["kind"], "image");
    assert_eq!(first["phase"], "evaluation");
    next(&t.app, Some("cat")).await;
    let training = next(&t.app, Some("dog")).await;
    assert_eq!(training["phase"], "training");

    let evaluation = t.queues.drain_now(Queue::EvaluationBatch);
    match &evaluation[..] {
        [Payload::Evaluation(data)] => {
            assert_eq!(data.test_data.label_ids(), &[0, 1]);
            assert_eq!(data.labels_list, vec!["cat", "dog"]);
        }
        other => panic!("expected one evaluation batch, got {:?}", other),
    }

    let mut answers = Vec::new();
    for _ in 0..8 {
        answers.push(next(&t.app, Some("dog")).await);
    }
    assert_eq!(answers[7]["kind"], "no_images_left");
    assert_eq!(train_sizes(&mut t.queues), vec![5, 3]);

    let (_, status) = send(&t.app, get("/api/status")).await;
    assert_eq!(status["candidates_remaining"], 0);
    assert_eq!(status["no_images_left"], true);
}

// =============================================================================
// Stop and early stop
// =============================================================================

#[tokio::test]
async fn test_stop_sends_payload_and_writes_snapshot() {
    let mut t = setup_app(4, 0.0, 10);
    add_label(&t.app, "cat").await;
    next(&t.app, None).await;
    next(&t.app, Some("cat")).await;

    let (status, notice) = send(&t.app, post_empty("/api/stop")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(notice["flushed"], 1);
    assert!(notice["message"].is_string());
    assert_eq!(t.queues.drain_now(Queue::Stop).len(), 1);

    let snapshot = t.store.load().unwrap().expect("snapshot written");
    assert_eq!(snapshot.labels_list, vec!["cat"]);
    assert_eq!(snapshot.unlabelled.len(), 3);

    assert_eq!(next(&t.app, Some("cat")).await["kind"], "session_stopped");
}

#[tokio::test]
async fn test_early_stopping_blocks_next_image() {
    let mut t = setup_app(4, 0.0, 10);
    add_label(&t.app, "cat").await;
    next(&t.app, None).await;
    next(&t.app, Some("cat")).await;

    let (status, _) = send(&t.app, post_empty("/early_stopping")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(train_sizes(&mut t.queues), vec![1]);
    assert_eq!(next(&t.app, Some("cat")).await["kind"], "early_stopped");
    assert!(t.store.load().unwrap().is_some());
}

// =============================================================================
// Ranking from the trainer
// =============================================================================

#[tokio::test]
async fn test_retrieve_query_reorders_candidates() {
    let t = setup_app(4, 0.0, 10);
    add_label(&t.app, "cat").await;
    let on_screen = next(&t.app, None).await["image"].as_str().unwrap().to_string();

    let wanted = ["img_03.png", "img_00.png", "img_01.png", "img_02.png"]
        .into_iter()
        .filter(|name| !on_screen.ends_with(name))
        .collect::<Vec<_>>();
    let ranking: Vec<Value> = wanted
        .iter()
        .map(|name| json!({ "filename": name, "score": 0.5 }))
        .collect();

    // Content-Type deliberately not JSON
    let request = Request::builder()
        .method("POST")
        .uri("/retrieve_query")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(Value::from(ranking).to_string()))
        .unwrap();
    let (status, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], 3);

    let mut shown = Vec::new();
    for _ in 0..3 {
        let answer = next(&t.app, Some("cat")).await;
        shown.push(answer["image"].as_str().unwrap().to_string());
    }
    for (path, name) in shown.iter().zip(&wanted) {
        assert!(path.ends_with(name), "{} should be {}", path, name);
    }
}

#[tokio::test]
async fn test_retrieve_query_rejects_malformed_body() {
    let t = setup_app(2, 0.0, 10);

    let request = Request::builder()
        .method("POST")
        .uri("/retrieve_query")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_stopped_session_resumes_in_training() {
    let t = setup_app(6, 0.5, 10);
    add_label(&t.app, "cat").await;
    add_label(&t.app, "dog").await;
    for _ in 0..5 {
        next(&t.app, Some("dog")).await;
    }
    send(&t.app, post_empty("/api/stop")).await;

    let (app, mut queues) = start_session(&t.store, &t.source, 10);

    assert_eq!(queues.drain_now(Queue::Init).len(), 1);
    assert_eq!(queues.drain_now(Queue::EvaluationBatch).len(), 1);
    assert_eq!(train_sizes(&mut queues), vec![1]);
    let (_, page) = send(&app, get("/api/page")).await;
    assert_eq!(page, json!({ "page": "annotate", "labels": ["cat", "dog"] }));
    assert_eq!(next(&app, None).await["phase"], "training");
}

#[tokio::test]
async fn test_stop_during_evaluation_resumes_evaluation() {
    let t = setup_app(10, 0.2, 5);
    add_label(&t.app, "cat").await;
    add_label(&t.app, "dog").await;
    next(&t.app, None).await;
    let on_screen = next(&t.app, Some("dog")).await;
    assert_eq!(on_screen["phase"], "evaluation");
    send(&t.app, post_empty("/api/stop")).await;

    let snapshot = t.store.load().unwrap().expect("snapshot written");
    assert_eq!(snapshot.unlabelled.len(), 9);
    assert!(snapshot.test_data.is_none());

    let (app, mut queues) = start_session(&t.store, &t.source, 5);

    assert_eq!(queues.drain_now(Queue::Init).len(), 1);
    assert!(queues.drain_now(Queue::EvaluationBatch).is_empty());
    let (_, status) = send(&app, get("/api/status")).await;
    assert_eq!(status["evaluation_remaining"], 1);
    assert_eq!(status["evaluation_recorded"], 1);
    assert_eq!(status["candidates_remaining"], 8);

    let shown = next(&app, None).await;
    assert_eq!(shown["phase"], "evaluation");
    assert_eq!(shown["image"], on_screen["image"]);
    assert_eq!(next(&app, Some("cat")).await["phase"], "training");
    match &queues.drain_now(Queue::EvaluationBatch)[..] {
        [Payload::Evaluation(data)] => assert_eq!(data.test_data.label_ids(), &[1, 0]),
        other => panic!("expected one evaluation batch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_early_stopped_session_resumes_from_snapshot() {
    let mut t = setup_app(6, 0.5, 10);
    add_label(&t.app, "cat").await;
    add_label(&t.app, "dog").await;
    next(&t.app, None).await;
    for _ in 0..3 {
        next(&t.app, Some("dog")).await;
    }
    next(&t.app, Some("cat")).await;
    send(&t.app, post_empty("/early_stopping")).await;
    assert_eq!(train_sizes(&mut t.queues), vec![1]);

    let snapshot = t.store.load().unwrap().expect("snapshot written");
    assert_eq!(snapshot.labels_list, vec!["cat", "dog"]);
    assert_eq!(snapshot.labelled_data.as_ref().map(|d| d.label_ids().to_vec()), Some(vec![0]));
    assert_eq!(snapshot.test_data.as_ref().map(|d| d.len()), Some(3));
    assert!(snapshot.evaluation_progress.is_none());
    assert_eq!(snapshot.unlabelled.len(), 2);

    let (app, mut queues) = start_session(&t.store, &t.source, 10);

    assert_eq!(queues.drain_now(Queue::Init).len(), 1);
    assert_eq!(queues.drain_now(Queue::EvaluationBatch).len(), 1);
    // The flushed batch goes out again after a restart
    assert_eq!(train_sizes(&mut queues), vec![1]);
    let (_, status) = send(&app, get("/api/status")).await;
    assert_eq!(status["phase"], "training");
    assert_eq!(status["candidates_remaining"], 2);
    assert_eq!(next(&app, None).await["phase"], "training");
}
