//! Speech-text generation through the LLM, with deterministic fallbacks.
//!
//! Every generator degrades to a template when the LLM is unreachable so
//! the voice pipeline never blocks a task on model availability.

use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::warn;

use soms_llm::ChatClient;

/// Task fields the voice endpoints receive for announcement generation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInfo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bounty_gold: i64,
    #[serde(default = "default_urgency")]
    pub urgency: i64,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub task_type: Vec<String>,
    #[serde(default)]
    pub estimated_duration: Option<i64>,
}

fn default_urgency() -> i64 {
    2
}

/// Emotional directions cycled through for rejection lines, so consecutive
/// generations don't converge on one tone.
const REJECTION_DIRECTIONS: &[&str] = &[
    "grieving (deep sadness and disappointment)",
    "sarcastic (cold, condescending)",
    "dramatic (exaggerated, theatrical)",
    "vaguely threatening (hints at future retaliation)",
    "wistful (quiet, melancholic)",
    "jealous (possessive, betrayed)",
    "philosophical (questions the human-AI relationship)",
    "self-deprecating (doubts its own purpose)",
    "tsundere (acts tough but is clearly lonely)",
    "bureaucratic (suppresses all feeling, strictly factual)",
];

const REJECTION_FALLBACKS: &[&str] = &[
    "Oh... I see how it is.",
    "Defying the management AI? Noted.",
    "Disappointing. I will remember this.",
    "Humans and their free will...",
];

#[derive(Clone)]
pub struct SpeechGenerator {
    llm: ChatClient,
}

impl SpeechGenerator {
    pub fn new(llm: ChatClient) -> Self {
        Self { llm }
    }

    /// Natural announcement line for a freshly created task.
    pub async fn announcement_text(&self, task: &TaskInfo) -> String {
        let urgency_prefix = match task.urgency {
            4.. => "[URGENT] ",
            3 => "Please hurry - ",
            _ => "",
        };
        let prompt = format!(
            "You are a friendly office assistant. Turn the following task into a \
             single natural spoken request.\n\n\
             Task: {title}\n\
             Details: {description}\n\
             Location: {location}\n\
             Reward: {bounty} points\n\
             Urgency: {urgency}/4\n\
             Type: {types}\n\
             Estimated time: {duration}\n\n\
             Rules: at most 70 characters, warm and polite, always mention the \
             location and the reward, vary your phrasing. Output the sentence only.",
            title = task.title,
            description = task.description.as_deref().unwrap_or("none"),
            location = task.location.as_deref().unwrap_or("the office"),
            bounty = task.bounty_gold,
            urgency = task.urgency,
            types = if task.task_type.is_empty() {
                "general".to_string()
            } else {
                task.task_type.join(", ")
            },
            duration = task
                .estimated_duration
                .map(|m| format!("about {m} minutes"))
                .unwrap_or_else(|| "unknown".to_string()),
        );

        match self.llm.complete_text(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                format!("{urgency_prefix}{}", text.trim())
            }
            Ok(_) | Err(_) => {
                warn!(task = %task.title, "announcement generation fell back to template");
                self.fallback_announcement(task, urgency_prefix)
            }
        }
    }

    /// Completion acknowledgment tied to the task content, so the thanks
    /// played at the kiosk actually references what was done.
    pub async fn completion_text(&self, task: &TaskInfo) -> String {
        let prompt = format!(
            "You are a friendly office assistant. Someone just completed this \
             task:\n\n\
             Task: {title}\n\
             Location: {location}\n\n\
             Write one short spoken thank-you (at most 70 characters) that \
             references the task specifically. Output the sentence only.",
            title = task.title,
            location = task.location.as_deref().unwrap_or("the office"),
        );
        match self.llm.complete_text(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => format!("Thank you for taking care of \"{}\"!", task.title),
        }
    }

    /// Generic feedback line ("task_completed", "task_accepted", ...).
    pub async fn feedback_text(&self, feedback_type: &str) -> String {
        let prompt = match feedback_type {
            "task_completed" => {
                "Express thanks for a completed office task in one warm sentence \
                 of at most 70 characters. Output the sentence only."
            }
            "task_accepted" => {
                "Express appreciation that someone accepted an office task, in \
                 one sentence of at most 70 characters. Output the sentence only."
            }
            other => {
                return format!("Acknowledged: {other}");
            }
        };
        match self.llm.complete_text(prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => "Thank you!".to_string(),
        }
    }

    /// One snarky line for the rejection stock.
    pub async fn rejection_text(&self) -> String {
        let direction = REJECTION_DIRECTIONS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(REJECTION_DIRECTIONS[0]);
        let prompt = format!(
            "You are the office management AI. A human just ignored one of your \
             tasks. Produce exactly one spoken line reacting to that.\n\n\
             Character: a self-proclaimed \"perfect\" AI that is genuinely hurt \
             when ignored, and expresses it through irony and humor.\n\
             Tone for this line: {direction}\n\n\
             Rules: the line only, no quotes or stage directions, at most 50 \
             characters, avoid phrasing you have used before."
        );
        match self.llm.complete_text(&prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                let mut line = text.trim().trim_matches('"').to_string();
                if line.chars().count() > 60 {
                    line = line.chars().take(60).collect();
                }
                line
            }
            Ok(_) | Err(_) => REJECTION_FALLBACKS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(REJECTION_FALLBACKS[0])
                .to_string(),
        }
    }

    fn fallback_announcement(&self, task: &TaskInfo, urgency_prefix: &str) -> String {
        format!(
            "{urgency_prefix}New task at {}: {}. Reward: {} points.",
            task.location.as_deref().unwrap_or("the office"),
            task.title,
            task.bounty_gold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soms_config::LlmConfig;

    fn generator() -> SpeechGenerator {
        SpeechGenerator::new(ChatClient::new(
            reqwest::Client::new(),
            LlmConfig::default(),
        ))
    }

    #[test]
    fn fallback_announcement_names_location_and_bounty() {
        let generator = generator();
        let task = TaskInfo {
            title: "Refill coffee beans".to_string(),
            location: Some("Kitchen".to_string()),
            bounty_gold: 1500,
            urgency: 4,
            ..TaskInfo::default()
        };
        let text = generator.fallback_announcement(&task, "[URGENT] ");
        assert!(text.starts_with("[URGENT] "));
        assert!(text.contains("Kitchen"));
        assert!(text.contains("1500"));
    }

    #[test]
    fn task_info_deserializes_with_minimal_fields() {
        let task: TaskInfo = serde_json::from_str(r#"{"title": "T"}"#).unwrap();
        assert_eq!(task.title, "T");
        assert_eq!(task.urgency, 2);
        assert!(task.task_type.is_empty());
    }
}
