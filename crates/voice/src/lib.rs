//! Voice pipeline: direct synthesis, dual task announcements, and the
//! pre-generated rejection stock that gives users an instant (snarky)
//! response when they ignore a task.

pub mod routes;
pub mod speech;
pub mod stock;
pub mod synth;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use soms_config::{LlmConfig, VoiceConfig};
use soms_llm::ChatClient;

use crate::routes::VoiceState;
use crate::speech::SpeechGenerator;
use crate::stock::{RejectionStock, StockEntry};
use crate::synth::SynthClient;

/// Pause between successful stock generations so synthesis capacity is not
/// monopolized.
const GENERATION_PAUSE: Duration = Duration::from_secs(3);
/// Startup grace before the idle generator first runs.
const WARMUP_DELAY: Duration = Duration::from_secs(10);

/// Run the voice HTTP service and its idle stock generator until the
/// process exits.
pub async fn serve(config: VoiceConfig, llm_config: LlmConfig, http: reqwest::Client) -> Result<()> {
    let audio_dir = PathBuf::from(&config.audio_dir);
    tokio::fs::create_dir_all(&audio_dir).await?;

    let speech = Arc::new(SpeechGenerator::new(ChatClient::new(
        http.clone(),
        llm_config,
    )));
    let synth = Arc::new(SynthClient::new(
        http,
        config.synth_url.clone(),
        config.synth_timeout_secs,
    ));
    let stock = Arc::new(RejectionStock::open(
        audio_dir.join("rejections"),
        config.max_stock,
        config.refill_threshold,
    ));

    let generator = IdleGenerator {
        stock: stock.clone(),
        speech: speech.clone(),
        synth: synth.clone(),
        idle_interval: Duration::from_secs(config.idle_interval_secs),
    };
    tokio::spawn(async move { generator.run().await });

    let state = VoiceState {
        speech,
        synth,
        stock,
        audio_dir,
    };
    let app = routes::router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "voice service listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Background refill of the rejection stock during idle time.
pub struct IdleGenerator {
    pub stock: Arc<RejectionStock>,
    pub speech: Arc<SpeechGenerator>,
    pub synth: Arc<SynthClient>,
    pub idle_interval: Duration,
}

impl IdleGenerator {
    pub async fn run(&self) {
        info!("rejection stock idle generator started");
        tokio::time::sleep(WARMUP_DELAY).await;
        loop {
            let should_generate = self.stock.needs_refill().await && self.stock.is_idle();
            if should_generate {
                match self.generate_one().await {
                    Ok(true) => tokio::time::sleep(GENERATION_PAUSE).await,
                    Ok(false) => tokio::time::sleep(self.idle_interval).await,
                    Err(err) => {
                        warn!(%err, "rejection generation failed");
                        tokio::time::sleep(self.idle_interval).await;
                    }
                }
            } else {
                tokio::time::sleep(self.idle_interval).await;
            }
        }
    }

    /// Generate one rejection entry: LLM text, synthesized audio, manifest
    /// append. Returns false when the stock is already full.
    pub async fn generate_one(&self) -> Result<bool> {
        if self.stock.is_full().await {
            return Ok(false);
        }
        let text = self.speech.rejection_text().await;
        let audio = self.synth.synthesize(&text).await?;

        let id = Uuid::new_v4().to_string()[..8].to_string();
        let audio_file = format!("rejection_{id}.mp3");
        self.synth
            .save_audio(&audio, &self.stock.dir().join(&audio_file))
            .await?;

        self.stock
            .add_entry(StockEntry {
                id,
                text: text.clone(),
                audio_file,
                created_at: Utc::now().to_rfc3339(),
            })
            .await?;
        let count = self.stock.count().await;
        debug!(text = %text, count = count, "generated rejection entry");
        Ok(true)
    }
}
