//! HTTP surface of the task store.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::effects::TaskEffects;
use crate::model::{
    TaskAccept, TaskComplete, TaskCreate, TaskStoreError, UserCreate, VoiceEventCreate,
};
use crate::store::TaskStore;

#[derive(Clone)]
pub struct AppState {
    pub store: TaskStore,
    pub effects: Arc<TaskEffects>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tasks/", get(list_tasks).post(create_task))
        .route("/tasks/stats", get(task_stats))
        .route("/tasks/queue", get(queued_tasks))
        .route("/tasks/:id/accept", put(accept_task))
        .route("/tasks/:id/complete", put(complete_task))
        .route("/tasks/:id/reminded", put(remind_task))
        .route("/tasks/:id/dispatch", put(dispatch_task))
        .route("/voice-events/", post(record_voice_event))
        .route("/users/", get(list_users).post(create_user))
        .with_state(state)
}

impl IntoResponse for TaskStoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            TaskStoreError::NotFound => StatusCode::NOT_FOUND,
            TaskStoreError::AlreadyCompleted | TaskStoreError::AlreadyAccepted => {
                StatusCode::BAD_REQUEST
            }
            TaskStoreError::BountyTooHigh(_)
            | TaskStoreError::UrgencyOutOfRange(_)
            | TaskStoreError::EmptyTaskType => StatusCode::UNPROCESSABLE_ENTITY,
            TaskStoreError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"detail": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, TaskStoreError> {
    let tasks = state.store.list(params.skip, params.limit).await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<AppState>,
    Json(create): Json<TaskCreate>,
) -> Result<impl IntoResponse, TaskStoreError> {
    let outcome = state.store.create(create).await?;
    if !outcome.deduplicated {
        let effects = state.effects.clone();
        let task = outcome.task.clone();
        tokio::spawn(async move { effects.on_created(&task).await });
    }
    Ok(Json(outcome.task))
}

async fn accept_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<TaskAccept>>,
) -> Result<impl IntoResponse, TaskStoreError> {
    let accept = body.map(|Json(b)| b).unwrap_or_default();
    let task = state.store.accept(id, accept).await?;
    Ok(Json(task))
}

async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<TaskComplete>>,
) -> Result<impl IntoResponse, TaskStoreError> {
    let complete = body.map(|Json(b)| b).unwrap_or_default();
    let (task, newly_completed) = state.store.complete(id, complete).await?;
    if newly_completed {
        let effects = state.effects.clone();
        let completed = task.clone();
        tokio::spawn(async move { effects.on_completed(&completed).await });
    }
    Ok(Json(task))
}

async fn remind_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.reminded(id).await?))
}

async fn dispatch_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.dispatch(id).await?))
}

async fn queued_tasks(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.queued().await?))
}

async fn task_stats(State(state): State<AppState>) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.stats().await?))
}

async fn record_voice_event(
    State(state): State<AppState>,
    Json(event): Json<VoiceEventCreate>,
) -> Result<impl IntoResponse, TaskStoreError> {
    let id = state.store.record_voice_event(event).await?;
    Ok(Json(json!({"id": id})))
}

async fn create_user(
    State(state): State<AppState>,
    Json(create): Json<UserCreate>,
) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.create_user(create).await?))
}

async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, TaskStoreError> {
    Ok(Json(state.store.list_users().await?))
}
