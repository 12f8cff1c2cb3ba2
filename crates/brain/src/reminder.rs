//! Periodic reminders for lingering tasks.
//!
//! Old uncompleted tasks get fresh announcement audio regenerated through
//! the voice service (the model produces a different phrasing each time)
//! and their `last_reminded_at` stamped, so a task ignored for an hour is
//! spoken again instead of silently rotting on the dashboard.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// A task must be at least this old before its first reminder.
const REMINDER_INTERVAL_MINUTES: i64 = 60;
/// Minimum spacing between reminders for the same task.
const REMINDER_COOLDOWN_MINUTES: i64 = 30;
/// How often the loop scans for candidates.
const CHECK_INTERVAL: Duration = Duration::from_secs(300);
/// Pause between consecutive reminders in one sweep.
const BETWEEN_REMINDERS: Duration = Duration::from_secs(2);

/// The task fields the reminder pass needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ReminderTask {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub bounty_gold: i64,
    #[serde(default)]
    pub urgency: i64,
    #[serde(default)]
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_reminded_at: Option<DateTime<Utc>>,
}

/// Whether `task` is due for a reminder at `now`.
pub fn needs_reminder(task: &ReminderTask, now: DateTime<Utc>) -> bool {
    if task.is_completed {
        return false;
    }
    if task.created_at > now - ChronoDuration::minutes(REMINDER_INTERVAL_MINUTES) {
        return false;
    }
    match task.last_reminded_at {
        Some(last) => last <= now - ChronoDuration::minutes(REMINDER_COOLDOWN_MINUTES),
        None => true,
    }
}

pub struct TaskReminder {
    http: reqwest::Client,
    taskstore_url: String,
    voice_url: String,
}

impl TaskReminder {
    pub fn new(http: reqwest::Client, taskstore_url: String, voice_url: String) -> Self {
        Self {
            http,
            taskstore_url,
            voice_url,
        }
    }

    /// Background loop; every failure is logged and the loop keeps going.
    pub async fn run(self) {
        info!(
            check_secs = CHECK_INTERVAL.as_secs(),
            "task reminder loop started"
        );
        loop {
            if let Err(err) = self.check_and_remind().await {
                error!(%err, "reminder sweep failed");
            }
            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }

    async fn check_and_remind(&self) -> anyhow::Result<()> {
        let response = self
            .http
            .get(format!("{}/tasks/", self.taskstore_url))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("task listing failed: {}", response.status());
        }
        let tasks: Vec<ReminderTask> = response.json().await?;

        let now = Utc::now();
        let due: Vec<ReminderTask> = tasks.into_iter().filter(|t| needs_reminder(t, now)).collect();
        if due.is_empty() {
            debug!("no tasks need reminders");
            return Ok(());
        }
        info!(count = due.len(), "tasks needing reminders");

        for task in due {
            self.remind(&task).await;
            tokio::time::sleep(BETWEEN_REMINDERS).await;
        }
        Ok(())
    }

    /// Regenerate announcement audio, then stamp `last_reminded_at`.
    async fn remind(&self, task: &ReminderTask) {
        info!(task = task.id, title = %task.title, "sending reminder");

        let payload = json!({
            "task": {
                "title": task.title,
                "description": task.description,
                "location": task.location,
                "bounty_gold": task.bounty_gold,
                "urgency": task.urgency,
                "zone": task.zone,
            }
        });
        let announced = self
            .http
            .post(format!("{}/api/voice/announce", self.voice_url))
            .timeout(Duration::from_secs(30))
            .json(&payload)
            .send()
            .await;
        match announced {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(task = task.id, status = %response.status(), "reminder audio generation failed");
                return;
            }
            Err(err) => {
                warn!(task = task.id, %err, "reminder audio generation error");
                return;
            }
        }

        let stamped = self
            .http
            .put(format!("{}/tasks/{}/reminded", self.taskstore_url, task.id))
            .send()
            .await;
        match stamped {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(task = task.id, status = %response.status(), "reminded stamp failed"),
            Err(err) => warn!(task = task.id, %err, "reminded stamp error"),
        }
    }
}
