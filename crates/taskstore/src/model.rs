//! Task records and API payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// Completion notes are clamped to this many characters.
pub const MAX_COMPLETION_NOTE: usize = 500;
/// Hard cap on task bounties (milli-units).
pub const MAX_BOUNTY_GOLD: i64 = 5000;

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task not found")]
    NotFound,
    #[error("task already completed")]
    AlreadyCompleted,
    #[error("task already accepted")]
    AlreadyAccepted,
    #[error("bounty_gold {0} exceeds maximum of {MAX_BOUNTY_GOLD}")]
    BountyTooHigh(i64),
    #[error("urgency {0} must be between 0 and 4")]
    UrgencyOutOfRange(i64),
    #[error("task_type elements must be non-empty strings")]
    EmptyTaskType,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Raw database row. `task_type` stays JSON-encoded here and is parsed at
/// the API boundary.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub zone: Option<String>,
    pub task_type: Option<String>,
    pub bounty_gold: i64,
    pub bounty_xp: i64,
    pub urgency: i64,
    pub min_people_required: i64,
    pub estimated_duration: i64,
    pub is_completed: bool,
    pub is_queued: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_reminded_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<i64>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub announcement_audio_url: Option<String>,
    pub announcement_text: Option<String>,
    pub completion_audio_url: Option<String>,
    pub completion_text: Option<String>,
    pub report_status: Option<String>,
    pub completion_note: Option<String>,
}

impl TaskRow {
    pub fn into_task(self) -> Task {
        let task_type = self
            .task_type
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            location: self.location,
            zone: self.zone,
            task_type,
            bounty_gold: self.bounty_gold,
            bounty_xp: self.bounty_xp,
            urgency: self.urgency,
            min_people_required: self.min_people_required,
            estimated_duration: self.estimated_duration,
            is_completed: self.is_completed,
            is_queued: self.is_queued,
            dispatched_at: self.dispatched_at,
            created_at: self.created_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
            last_reminded_at: self.last_reminded_at,
            assigned_to: self.assigned_to,
            accepted_at: self.accepted_at,
            announcement_audio_url: self.announcement_audio_url,
            announcement_text: self.announcement_text,
            completion_audio_url: self.completion_audio_url,
            completion_text: self.completion_text,
            report_status: self.report_status,
            completion_note: self.completion_note,
        }
    }
}

/// API-facing task representation (`task_type` decoded to a list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub zone: Option<String>,
    pub task_type: Vec<String>,
    pub bounty_gold: i64,
    pub bounty_xp: i64,
    pub urgency: i64,
    pub min_people_required: i64,
    pub estimated_duration: i64,
    pub is_completed: bool,
    pub is_queued: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_reminded_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<i64>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub announcement_audio_url: Option<String>,
    pub announcement_text: Option<String>,
    pub completion_audio_url: Option<String>,
    pub completion_text: Option<String>,
    pub report_status: Option<String>,
    pub completion_note: Option<String>,
}

/// Create payload. Dedup may turn a create into an in-place update of an
/// existing open task, in which case the existing id is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub task_type: Vec<String>,
    #[serde(default)]
    pub bounty_gold: i64,
    #[serde(default)]
    pub bounty_xp: i64,
    #[serde(default = "default_urgency")]
    pub urgency: i64,
    #[serde(default = "default_min_people")]
    pub min_people_required: i64,
    #[serde(default = "default_duration")]
    pub estimated_duration: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Set by the scheduler when the dispatch oracle decided to hold the
    /// task back; defaults to immediately dispatched.
    #[serde(default)]
    pub is_queued: bool,
    #[serde(default)]
    pub announcement_audio_url: Option<String>,
    #[serde(default)]
    pub announcement_text: Option<String>,
    #[serde(default)]
    pub completion_audio_url: Option<String>,
    #[serde(default)]
    pub completion_text: Option<String>,
}

fn default_urgency() -> i64 {
    2
}
fn default_min_people() -> i64 {
    1
}
fn default_duration() -> i64 {
    10
}

impl TaskCreate {
    pub fn validate(&self) -> Result<(), TaskStoreError> {
        if self.bounty_gold > MAX_BOUNTY_GOLD {
            return Err(TaskStoreError::BountyTooHigh(self.bounty_gold));
        }
        if !(0..=4).contains(&self.urgency) {
            return Err(TaskStoreError::UrgencyOutOfRange(self.urgency));
        }
        if self.task_type.iter().any(|t| t.trim().is_empty()) {
            return Err(TaskStoreError::EmptyTaskType);
        }
        Ok(())
    }

    /// Default display lifetime when the caller supplied no expiry:
    /// 24 h baseline, clamped to 1 h for environment issues, stretched to a
    /// week for supplies, clamped to 30 min for urgent flags.
    pub fn expiry_minutes(&self) -> i64 {
        let mut minutes: i64 = 60 * 24;
        let has = |tag: &str| self.task_type.iter().any(|t| t == tag);
        if has("environment") {
            minutes = minutes.min(60);
        }
        if has("supply") {
            minutes = 60 * 24 * 7;
        }
        if has("urgent") {
            minutes = minutes.min(30);
        }
        minutes
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskAccept {
    /// `None` means an anonymous kiosk accept.
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskComplete {
    pub report_status: Option<String>,
    pub completion_note: Option<String>,
}

/// Outcome of a create: either a brand-new row or a dedup merge.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub task: Task,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatsResponse {
    pub total_xp: i64,
    pub tasks_completed: i64,
    pub tasks_created: i64,
    pub tasks_active: i64,
    pub tasks_queued: i64,
    pub tasks_completed_last_hour: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceEventCreate {
    pub message: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserCreate {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_create() -> TaskCreate {
        TaskCreate {
            title: "T".into(),
            description: String::new(),
            location: None,
            zone: None,
            task_type: vec![],
            bounty_gold: 0,
            bounty_xp: 0,
            urgency: 2,
            min_people_required: 1,
            estimated_duration: 10,
            expires_at: None,
            is_queued: false,
            announcement_audio_url: None,
            announcement_text: None,
            completion_audio_url: None,
            completion_text: None,
        }
    }

    #[test]
    fn bounty_cap_enforced() {
        let mut create = base_create();
        create.bounty_gold = 5000;
        assert!(create.validate().is_ok());
        create.bounty_gold = 5001;
        assert!(matches!(
            create.validate(),
            Err(TaskStoreError::BountyTooHigh(_))
        ));
    }

    #[test]
    fn empty_task_type_element_rejected() {
        let mut create = base_create();
        create.task_type = vec!["supply".into(), "  ".into()];
        assert!(matches!(
            create.validate(),
            Err(TaskStoreError::EmptyTaskType)
        ));
    }

    #[test]
    fn expiry_rules_by_task_type() {
        let mut create = base_create();
        assert_eq!(create.expiry_minutes(), 60 * 24);
        create.task_type = vec!["environment".into()];
        assert_eq!(create.expiry_minutes(), 60);
        create.task_type = vec!["supply".into()];
        assert_eq!(create.expiry_minutes(), 60 * 24 * 7);
        create.task_type = vec!["urgent".into()];
        assert_eq!(create.expiry_minutes(), 30);
    }
}
