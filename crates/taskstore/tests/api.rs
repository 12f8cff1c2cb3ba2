//! HTTP-level tests of the task API: dedup through the POST endpoint,
//! lifecycle transitions, and the task-report bus publish on completion.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use soms_bus::Bus;
use soms_taskstore::effects::TaskEffects;
use soms_taskstore::routes::{self, AppState};
use soms_taskstore::store::TaskStore;

async fn app_with_bus() -> (Router, Bus) {
    let store = TaskStore::connect_in_memory().await.unwrap();
    let bus = Bus::new();
    // The ledger URL is unreachable on purpose; payment and XP effects are
    // fire-and-forget and must not affect the API responses.
    let effects = Arc::new(TaskEffects::new(
        reqwest::Client::new(),
        "http://127.0.0.1:1".to_string(),
        Some(bus.clone()),
    ));
    (routes::router(AppState { store, effects }), bus)
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn create_accept_complete_flow_publishes_task_report() {
    let (app, bus) = app_with_bus().await;
    let mut reports = bus.subscribe("office/+/task_report/#").unwrap();

    let (status, task) = request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({
            "title": "T1",
            "description": "restock",
            "location": "Office",
            "zone": "main",
            "bounty_gold": 1500,
            "task_type": ["supply"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = task["id"].as_i64().unwrap();

    let (status, accepted) = request(
        &app,
        "PUT",
        &format!("/tasks/{id}/accept"),
        Some(json!({"user_id": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["assigned_to"], 7);

    let (status, completed) = request(
        &app,
        "PUT",
        &format!("/tasks/{id}/complete"),
        Some(json!({"report_status": "resolved", "completion_note": "done"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["is_completed"], true);

    // Completion publishes office/{zone}/task_report/{id} for the Brain.
    let report = tokio::time::timeout(std::time::Duration::from_secs(2), reports.recv())
        .await
        .expect("task report published")
        .unwrap();
    assert_eq!(report.topic, format!("office/main/task_report/{id}"));
    assert_eq!(report.payload["report_status"], "resolved");
    assert_eq!(report.payload["completion_note"], "done");
}

#[tokio::test]
async fn duplicate_create_returns_existing_task() {
    let (app, _bus) = app_with_bus().await;
    let body = json!({
        "title": "T",
        "description": "first",
        "location": "Office",
        "task_type": ["supply"]
    });
    let (_, first) = request(&app, "POST", "/tasks/", Some(body)).await;

    let (_, second) = request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({
            "title": "T",
            "description": "second",
            "location": "Office",
            "task_type": ["supply"]
        })),
    )
    .await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["description"], "second");

    let (_, list) = request(&app, "GET", "/tasks/", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lifecycle_guards_map_to_http_statuses() {
    let (app, _bus) = app_with_bus().await;
    let (status, _) = request(&app, "PUT", "/tasks/999/accept", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, task) = request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({"title": "G", "description": ""})),
    )
    .await;
    let id = task["id"].as_i64().unwrap();

    let (status, _) = request(&app, "PUT", &format!("/tasks/{id}/accept"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, "PUT", &format!("/tasks/{id}/accept"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    request(&app, "PUT", &format!("/tasks/{id}/complete"), None).await;
    let (status, body) = request(&app, "PUT", &format!("/tasks/{id}/accept"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("completed"));
}

#[tokio::test]
async fn invalid_payloads_are_unprocessable() {
    let (app, _bus) = app_with_bus().await;
    let (status, _) = request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({"title": "B", "bounty_gold": 9000})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({"title": "B", "task_type": ["", "supply"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn stats_reflect_queue_and_completion_counts() {
    let (app, _bus) = app_with_bus().await;
    request(
        &app,
        "POST",
        "/tasks/",
        Some(json!({"title": "A", "is_queued": true, "urgency": 3})),
    )
    .await;
    let (_, task) = request(&app, "POST", "/tasks/", Some(json!({"title": "B"}))).await;
    request(
        &app,
        "PUT",
        &format!("/tasks/{}/complete", task["id"].as_i64().unwrap()),
        None,
    )
    .await;

    let (status, stats) = request(&app, "GET", "/tasks/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["tasks_created"], 2);
    assert_eq!(stats["tasks_queued"], 1);
    assert_eq!(stats["tasks_completed"], 1);
    assert_eq!(stats["tasks_completed_last_hour"], 1);

    let (_, queue) = request(&app, "GET", "/tasks/queue", None).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["title"], "A");
}
