//! HTTP surface of the voice pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::speech::{SpeechGenerator, TaskInfo};
use crate::stock::RejectionStock;
use crate::synth::{SynthClient, SynthError};

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error("audio not found")]
    AudioNotFound,
    #[error("invalid filename")]
    InvalidFilename,
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            VoiceError::AudioNotFound => StatusCode::NOT_FOUND,
            VoiceError::InvalidFilename => StatusCode::BAD_REQUEST,
            VoiceError::Synth(_) | VoiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"detail": self.to_string()}))).into_response()
    }
}

#[derive(Clone)]
pub struct VoiceState {
    pub speech: Arc<SpeechGenerator>,
    pub synth: Arc<SynthClient>,
    pub stock: Arc<RejectionStock>,
    pub audio_dir: PathBuf,
}

pub fn router(state: VoiceState) -> Router {
    Router::new()
        .route("/api/voice/synthesize", post(synthesize))
        .route("/api/voice/announce", post(announce))
        .route("/api/voice/announce_with_completion", post(announce_with_completion))
        .route("/api/voice/feedback/:feedback_type", post(feedback))
        .route("/api/voice/rejection/random", get(rejection_random))
        .route("/api/voice/rejection/status", get(rejection_status))
        .route("/api/voice/rejection/clear", post(rejection_clear))
        .route("/audio/rejections/:filename", get(serve_rejection_audio))
        .route("/audio/:filename", get(serve_audio))
        .with_state(state)
}

// ── payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SynthesizeRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct TaskAnnounceRequest {
    task: TaskInfo,
}

#[derive(Debug, Serialize)]
struct VoiceResponse {
    audio_url: String,
    text_generated: String,
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct DualVoiceResponse {
    announcement_audio_url: String,
    announcement_text: String,
    announcement_duration: f64,
    completion_audio_url: String,
    completion_text: String,
    completion_duration: f64,
}

// ── synthesis endpoints ──────────────────────────────────────────────────────

/// Direct text → audio; backs the Brain's `speak` tool.
async fn synthesize(
    State(state): State<VoiceState>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<impl IntoResponse, VoiceError> {
    let _guard = state.stock.begin_request();
    let (url, duration) = render_audio(&state, &request.text, "speak").await?;
    Ok(Json(VoiceResponse {
        audio_url: url,
        text_generated: request.text,
        duration_seconds: duration,
    }))
}

async fn announce(
    State(state): State<VoiceState>,
    Json(request): Json<TaskAnnounceRequest>,
) -> Result<impl IntoResponse, VoiceError> {
    let _guard = state.stock.begin_request();
    let text = state.speech.announcement_text(&request.task).await;
    let (url, duration) = render_audio(&state, &text, "task").await?;
    Ok(Json(VoiceResponse {
        audio_url: url,
        text_generated: text,
        duration_seconds: duration,
    }))
}

/// Announcement + context-aware completion in one call; both are attached
/// to the task so the kiosk can play them without further generation.
async fn announce_with_completion(
    State(state): State<VoiceState>,
    Json(request): Json<TaskAnnounceRequest>,
) -> Result<impl IntoResponse, VoiceError> {
    let _guard = state.stock.begin_request();
    let announcement_text = state.speech.announcement_text(&request.task).await;
    let completion_text = state.speech.completion_text(&request.task).await;

    let (announcement_url, announcement_duration) =
        render_audio(&state, &announcement_text, "task_announce").await?;
    let (completion_url, completion_duration) =
        render_audio(&state, &completion_text, "task_complete").await?;

    Ok(Json(DualVoiceResponse {
        announcement_audio_url: announcement_url,
        announcement_text,
        announcement_duration,
        completion_audio_url: completion_url,
        completion_text,
        completion_duration,
    }))
}

async fn feedback(
    State(state): State<VoiceState>,
    Path(feedback_type): Path<String>,
) -> Result<impl IntoResponse, VoiceError> {
    let _guard = state.stock.begin_request();
    let text = state.speech.feedback_text(&feedback_type).await;
    let (url, duration) = render_audio(&state, &text, "feedback").await?;
    Ok(Json(VoiceResponse {
        audio_url: url,
        text_generated: text,
        duration_seconds: duration,
    }))
}

async fn render_audio(
    state: &VoiceState,
    text: &str,
    prefix: &str,
) -> Result<(String, f64), VoiceError> {
    let audio = state.synth.synthesize(text).await?;
    let filename = format!("{prefix}_{}.mp3", Uuid::new_v4());
    let path = state.audio_dir.join(&filename);
    state.synth.save_audio(&audio, &path).await?;
    Ok((
        format!("/audio/{filename}"),
        SynthClient::estimate_duration(&audio),
    ))
}

// ── rejection stock ──────────────────────────────────────────────────────────

async fn rejection_random(
    State(state): State<VoiceState>,
) -> Result<impl IntoResponse, VoiceError> {
    if let Some(entry) = state.stock.pop_random().await {
        return Ok(Json(json!({
            "audio_url": format!("/audio/rejections/{}", entry.audio_file),
            "text": entry.text,
            "from_stock": true,
        })));
    }

    // Stock is dry: generate one on demand without touching the manifest.
    let _guard = state.stock.begin_request();
    let text = state.speech.rejection_text().await;
    let audio = state.synth.synthesize(&text).await?;
    let filename = format!("rejection_{}.mp3", &Uuid::new_v4().to_string()[..8]);
    let path = state.stock.dir().join(&filename);
    state.synth.save_audio(&audio, &path).await?;
    Ok(Json(json!({
        "audio_url": format!("/audio/rejections/{filename}"),
        "text": text,
        "from_stock": false,
    })))
}

async fn rejection_status(State(state): State<VoiceState>) -> impl IntoResponse {
    Json(json!({
        "stock_count": state.stock.count().await,
        "busy": !state.stock.is_idle(),
    }))
}

async fn rejection_clear(
    State(state): State<VoiceState>,
) -> Result<impl IntoResponse, VoiceError> {
    state.stock.clear().await?;
    Ok(Json(json!({"status": "ok"})))
}

// ── audio file serving ───────────────────────────────────────────────────────

async fn serve_audio(
    State(state): State<VoiceState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, VoiceError> {
    serve_file(state.audio_dir.join(checked_filename(&filename)?)).await
}

async fn serve_rejection_audio(
    State(state): State<VoiceState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, VoiceError> {
    serve_file(state.stock.dir().join(checked_filename(&filename)?)).await
}

fn checked_filename(filename: &str) -> Result<&str, VoiceError> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(VoiceError::InvalidFilename);
    }
    Ok(filename)
}

async fn serve_file(path: PathBuf) -> Result<Response, VoiceError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| VoiceError::AudioNotFound)?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
}
