use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible LLM endpoint settings shared by Brain and Voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model: "qwen2.5:14b".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

/// Cognitive-cycle pacing and guard constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Normal polling interval when no events arrive (seconds).
    pub cycle_interval_secs: u64,
    /// Delay after an event wake-up to batch bursts (seconds).
    pub event_batch_delay_secs: u64,
    /// Hard floor between two cognitive cycles (seconds).
    pub min_cycle_interval_secs: u64,
    pub react_max_iterations: usize,
    pub max_speak_per_cycle: usize,
    pub max_consecutive_errors: usize,
    /// Local hours during which low-urgency tasks may be dispatched.
    pub active_hours_start: u32,
    pub active_hours_end: u32,
    pub taskstore_url: String,
    pub voice_url: String,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            event_batch_delay_secs: 3,
            min_cycle_interval_secs: 25,
            react_max_iterations: 5,
            max_speak_per_cycle: 1,
            max_consecutive_errors: 1,
            active_hours_start: 7,
            active_hours_end: 22,
            taskstore_url: "http://localhost:8001".to_string(),
            voice_url: "http://localhost:8003".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStoreConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub ledger_url: String,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8001".to_string(),
            database_url: "sqlite://soms-tasks.db?mode=rwc".to_string(),
            ledger_url: "http://localhost:8002".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub bind_addr: String,
    pub database_url: String,
    /// Seconds between automatic demurrage cycles.
    pub demurrage_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8002".to_string(),
            database_url: "sqlite://soms-ledger.db?mode=rwc".to_string(),
            demurrage_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub bind_addr: String,
    /// Root directory for generated audio; rejections live in a subdirectory.
    pub audio_dir: String,
    /// Black-box speech-synthesis HTTP service.
    pub synth_url: String,
    pub synth_timeout_secs: u64,
    pub max_stock: usize,
    pub refill_threshold: usize,
    pub idle_interval_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8003".to_string(),
            audio_dir: "/app/audio".to_string(),
            synth_url: "http://localhost:50021".to_string(),
            synth_timeout_secs: 60,
            max_stock: 100,
            refill_threshold: 80,
            idle_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SomsConfig {
    pub llm: LlmConfig,
    pub brain: BrainConfig,
    pub taskstore: TaskStoreConfig,
    pub ledger: LedgerConfig,
    pub voice: VoiceConfig,
    pub telemetry: TelemetryConfig,
}

impl SomsConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing. A handful of deployment knobs can be overridden from the
    /// environment so containers don't need a config file at all.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("LLM_API_URL") {
            if !value.is_empty() {
                self.llm.api_url = value;
            }
        }
        if let Ok(value) = env::var("OPENAI_API_KEY") {
            if !value.is_empty() {
                self.llm.api_key = value;
            }
        }
        if let Ok(value) = env::var("LLM_MODEL") {
            if !value.is_empty() {
                self.llm.model = value;
            }
        }
        if let Ok(value) = env::var("TASKSTORE_URL") {
            if !value.is_empty() {
                self.brain.taskstore_url = value;
            }
        }
        if let Ok(value) = env::var("VOICE_SERVICE_URL") {
            if !value.is_empty() {
                self.brain.voice_url = value;
            }
        }
        if let Ok(value) = env::var("LEDGER_URL") {
            if !value.is_empty() {
                self.taskstore.ledger_url = value;
            }
        }
        if let Ok(value) = env::var("SYNTH_URL") {
            if !value.is_empty() {
                self.voice.synth_url = value;
            }
        }
    }
}
