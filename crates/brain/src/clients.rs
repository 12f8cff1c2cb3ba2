//! HTTP clients for the TaskStore and Voice services, sharing the process
//! pooled `reqwest::Client`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// Default per-request timeout for service calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Dual-voice generation involves two LLM and two synthesizer calls.
const VOICE_GENERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// The slice of a task the Brain cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSummary {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub task_type: Vec<String>,
    #[serde(default)]
    pub is_completed: bool,
}

/// Payload for task creation, including pre-generated voice data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskCreatePayload {
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub zone: Option<String>,
    pub task_type: Vec<String>,
    pub bounty_gold: i64,
    pub urgency: i64,
    pub is_queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement_audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl TaskApiClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// POST the task; the store deduplicates. Returns the stored task id.
    pub async fn create_task(&self, payload: &TaskCreatePayload) -> anyhow::Result<TaskSummary> {
        let response = self
            .http
            .post(format!("{}/tasks/", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .json(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("task creation failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    /// Non-completed tasks currently visible on the dashboard.
    pub async fn active_tasks(&self) -> anyhow::Result<Vec<TaskSummary>> {
        let response = self
            .http
            .get(format!("{}/tasks/", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("task listing failed: {}", response.status());
        }
        let tasks: Vec<TaskSummary> = response.json().await?;
        Ok(tasks.into_iter().filter(|t| !t.is_completed).collect())
    }

    pub async fn dispatch(&self, task_id: i64) -> anyhow::Result<()> {
        let response = self
            .http
            .put(format!("{}/tasks/{task_id}/dispatch", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("dispatch of task {task_id} failed: {}", response.status());
        }
        Ok(())
    }

    /// Record an ephemeral voice event; failures only warn.
    pub async fn record_voice_event(
        &self,
        message: &str,
        audio_url: Option<&str>,
        zone: Option<&str>,
        tone: &str,
    ) {
        let body = json!({
            "message": message,
            "audio_url": audio_url.unwrap_or(""),
            "zone": zone,
            "tone": tone,
        });
        if let Err(err) = self
            .http
            .post(format!("{}/voice-events/", self.base_url))
            .timeout(HTTP_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            warn!(%err, "failed to record voice event");
        }
    }
}

/// Voice payload fields returned by `announce_with_completion`.
#[derive(Debug, Clone, Deserialize)]
pub struct DualVoice {
    pub announcement_audio_url: String,
    pub announcement_text: String,
    pub completion_audio_url: String,
    pub completion_text: String,
}

#[derive(Debug, Clone)]
pub struct VoiceApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl VoiceApiClient {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    /// Direct text-to-speech; returns the audio URL, or `None` on failure
    /// (the caller records the voice event without audio).
    pub async fn synthesize(&self, text: &str) -> Option<String> {
        let result = self
            .http
            .post(format!("{}/api/voice/synthesize", self.base_url))
            .timeout(Duration::from_secs(60))
            .json(&json!({"text": text}))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("audio_url").and_then(Value::as_str).map(str::to_string)),
            Ok(response) => {
                warn!(status = %response.status(), "voice synthesize failed");
                None
            }
            Err(err) => {
                warn!(%err, "voice synthesize error");
                None
            }
        }
    }

    /// Generate announcement + completion voices for a task about to be
    /// created. `None` means the task is created with null voice fields.
    pub async fn announce_with_completion(&self, task: &Value) -> Option<DualVoice> {
        let result = self
            .http
            .post(format!("{}/api/voice/announce_with_completion", self.base_url))
            .timeout(VOICE_GENERATION_TIMEOUT)
            .json(&json!({"task": task}))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                warn!(status = %response.status(), "dual voice generation failed");
                None
            }
            Err(err) => {
                warn!(%err, "dual voice generation error");
                None
            }
        }
    }
}
