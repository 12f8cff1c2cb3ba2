//! Client for the black-box speech-synthesis HTTP service.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("synthesizer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("synthesizer error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("failed to save audio: {0}")]
    Io(#[from] std::io::Error),
}

/// Synthesized audio is roughly 24 kHz 16-bit mono; used for duration
/// estimates only.
const BYTES_PER_SECOND: f64 = 24_000.0 * 2.0;

#[derive(Debug, Clone)]
pub struct SynthClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SynthClient {
    pub fn new(http: reqwest::Client, base_url: String, timeout_secs: u64) -> Self {
        Self {
            http,
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Text → audio bytes.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthError> {
        let endpoint = format!("{}/synthesize", self.base_url.trim_end_matches('/'));
        debug!(chars = text.len(), "synthesizing speech");
        let response = self
            .http
            .post(&endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({"text": text}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn save_audio(&self, audio: &[u8], path: &Path) -> Result<(), SynthError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, audio).await?;
        Ok(())
    }

    /// Rough playback duration estimate from the payload size.
    pub fn estimate_duration(audio: &[u8]) -> f64 {
        (audio.len() as f64 / BYTES_PER_SECOND * 100.0).round() / 100.0
    }
}
