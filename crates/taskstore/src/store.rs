//! SQL persistence for tasks, stats, voice events, and users.
//!
//! Dedup, lifecycle transitions, and stat counters all live here so the
//! HTTP layer stays a thin mapping. Every multi-statement mutation runs in
//! one transaction.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::model::{
    CreateOutcome, SystemStatsResponse, Task, TaskAccept, TaskComplete, TaskCreate, TaskRow,
    TaskStoreError, User, UserCreate, VoiceEventCreate, MAX_COMPLETION_NOTE,
};

#[derive(Debug, Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (creating if missing) and migrate the database at `url`.
    pub async fn connect(url: &str) -> Result<Self, TaskStoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!(url, "task store ready");
        Ok(Self { pool })
    }

    /// Private in-memory store, used by tests and local experiments.
    pub async fn connect_in_memory() -> Result<Self, TaskStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    // ── create with dedup ────────────────────────────────────────────────────

    /// Create a task, merging into an existing open task when the exact
    /// (title, location) key or the (zone, overlapping task_type) semantic
    /// key matches. Merging updates the existing row in place and keeps its
    /// id so already-generated announcement audio is not re-made.
    pub async fn create(&self, create: TaskCreate) -> Result<CreateOutcome, TaskStoreError> {
        create.validate()?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        // Stage 1: exact title + location.
        let mut existing: Option<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE title = ? AND location IS ? AND is_completed = 0 LIMIT 1",
        )
        .bind(&create.title)
        .bind(&create.location)
        .fetch_optional(&mut *tx)
        .await?;

        // Stage 2: same zone with at least one shared task_type element.
        if existing.is_none() && create.zone.is_some() && !create.task_type.is_empty() {
            let candidates: Vec<TaskRow> =
                sqlx::query_as("SELECT * FROM tasks WHERE zone = ? AND is_completed = 0")
                    .bind(&create.zone)
                    .fetch_all(&mut *tx)
                    .await?;
            let new_types: HashSet<&str> = create.task_type.iter().map(String::as_str).collect();
            existing = candidates.into_iter().find(|candidate| {
                candidate
                    .task_type
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
                    .is_some_and(|types| types.iter().any(|t| new_types.contains(t.as_str())))
            });
        }

        if let Some(row) = existing {
            let task_type_json = encode_task_type(&create.task_type);
            sqlx::query(
                "UPDATE tasks SET description = ?, bounty_gold = ?, expires_at = ?, task_type = ?,
                        urgency = ?, zone = ?, min_people_required = ?, estimated_duration = ?,
                        announcement_audio_url = COALESCE(?, announcement_audio_url),
                        announcement_text = COALESCE(?, announcement_text),
                        completion_audio_url = COALESCE(?, completion_audio_url),
                        completion_text = COALESCE(?, completion_text)
                 WHERE id = ?",
            )
            .bind(&create.description)
            .bind(create.bounty_gold)
            .bind(create.expires_at)
            .bind(task_type_json)
            .bind(create.urgency)
            .bind(&create.zone)
            .bind(create.min_people_required)
            .bind(create.estimated_duration)
            .bind(&create.announcement_audio_url)
            .bind(&create.announcement_text)
            .bind(&create.completion_audio_url)
            .bind(&create.completion_text)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

            let updated = Self::fetch_row(&mut tx, row.id).await?;
            tx.commit().await?;
            return Ok(CreateOutcome {
                task: updated.into_task(),
                deduplicated: true,
            });
        }

        let expires_at = create
            .expires_at
            .unwrap_or_else(|| now + Duration::minutes(create.expiry_minutes()));
        let dispatched_at = if create.is_queued { None } else { Some(now) };
        let task_type_json = encode_task_type(&create.task_type);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks (title, description, location, zone, task_type, bounty_gold,
                                bounty_xp, urgency, min_people_required, estimated_duration,
                                is_completed, is_queued, dispatched_at, created_at, expires_at,
                                announcement_audio_url, announcement_text,
                                completion_audio_url, completion_text)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&create.title)
        .bind(&create.description)
        .bind(&create.location)
        .bind(&create.zone)
        .bind(task_type_json)
        .bind(create.bounty_gold)
        .bind(create.bounty_xp)
        .bind(create.urgency)
        .bind(create.min_people_required)
        .bind(create.estimated_duration)
        .bind(create.is_queued)
        .bind(dispatched_at)
        .bind(now)
        .bind(expires_at)
        .bind(&create.announcement_audio_url)
        .bind(&create.announcement_text)
        .bind(&create.completion_audio_url)
        .bind(&create.completion_text)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO system_stats (id, total_xp, tasks_completed, tasks_created)
             VALUES (1, 0, 0, 1)
             ON CONFLICT (id) DO UPDATE SET tasks_created = tasks_created + 1",
        )
        .execute(&mut *tx)
        .await?;

        let row = Self::fetch_row(&mut tx, id).await?;
        tx.commit().await?;
        Ok(CreateOutcome {
            task: row.into_task(),
            deduplicated: false,
        })
    }

    // ── reads ────────────────────────────────────────────────────────────────

    /// Non-expired tasks, oldest first.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<Task>, TaskStoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE expires_at IS NULL OR expires_at > ?
             ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(Utc::now())
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Task, TaskStoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).ok_or(TaskStoreError::NotFound)
    }

    /// Queued tasks ordered by urgency (desc) then age (asc).
    pub async fn queued(&self) -> Result<Vec<Task>, TaskStoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE is_queued = 1
             ORDER BY urgency DESC, created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    pub async fn stats(&self) -> Result<SystemStatsResponse, TaskStoreError> {
        let (total_xp, tasks_completed, tasks_created): (i64, i64, i64) = sqlx::query_as(
            "SELECT total_xp, tasks_completed, tasks_created FROM system_stats WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or((0, 0, 0));

        let tasks_queued: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE is_queued = 1")
                .fetch_one(&self.pool)
                .await?;
        let tasks_active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE is_completed = 0 AND is_queued = 0",
        )
        .fetch_one(&self.pool)
        .await?;
        let hour_ago = Utc::now() - Duration::hours(1);
        let tasks_completed_last_hour: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE is_completed = 1 AND completed_at >= ?",
        )
        .bind(hour_ago)
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStatsResponse {
            total_xp,
            tasks_completed,
            tasks_created,
            tasks_active,
            tasks_queued,
            tasks_completed_last_hour,
        })
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    pub async fn accept(&self, id: i64, accept: TaskAccept) -> Result<Task, TaskStoreError> {
        let mut tx = self.pool.begin().await?;
        let row = Self::fetch_row(&mut tx, id).await?;
        if row.is_completed {
            return Err(TaskStoreError::AlreadyCompleted);
        }
        if row.accepted_at.is_some() {
            return Err(TaskStoreError::AlreadyAccepted);
        }

        sqlx::query("UPDATE tasks SET assigned_to = ?, accepted_at = ? WHERE id = ?")
            .bind(accept.user_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let row = Self::fetch_row(&mut tx, id).await?;
        tx.commit().await?;
        Ok(row.into_task())
    }

    /// Mark a task completed. Returns the task and whether this call was the
    /// one that completed it — repeat completions are no-ops so stat counters
    /// and payment side effects fire exactly once.
    pub async fn complete(
        &self,
        id: i64,
        complete: TaskComplete,
    ) -> Result<(Task, bool), TaskStoreError> {
        let mut tx = self.pool.begin().await?;
        let row = Self::fetch_row(&mut tx, id).await?;
        if row.is_completed {
            tx.commit().await?;
            return Ok((row.into_task(), false));
        }

        let note = complete
            .completion_note
            .map(|n| n.chars().take(MAX_COMPLETION_NOTE).collect::<String>());
        sqlx::query(
            "UPDATE tasks SET is_completed = 1, completed_at = ?,
                    report_status = COALESCE(?, report_status),
                    completion_note = COALESCE(?, completion_note)
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(&complete.report_status)
        .bind(&note)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO system_stats (id, total_xp, tasks_completed, tasks_created)
             VALUES (1, ?, 1, 0)
             ON CONFLICT (id) DO UPDATE SET
                total_xp = total_xp + excluded.total_xp,
                tasks_completed = tasks_completed + 1",
        )
        .bind(row.bounty_xp)
        .execute(&mut *tx)
        .await?;

        let row = Self::fetch_row(&mut tx, id).await?;
        tx.commit().await?;
        Ok((row.into_task(), true))
    }

    pub async fn dispatch(&self, id: i64) -> Result<Task, TaskStoreError> {
        self.touch(
            id,
            "UPDATE tasks SET is_queued = 0, dispatched_at = ? WHERE id = ?",
        )
        .await
    }

    pub async fn reminded(&self, id: i64) -> Result<Task, TaskStoreError> {
        self.touch(id, "UPDATE tasks SET last_reminded_at = ? WHERE id = ?")
            .await
    }

    async fn touch(&self, id: i64, sql: &str) -> Result<Task, TaskStoreError> {
        let mut tx = self.pool.begin().await?;
        Self::fetch_row(&mut tx, id).await?;
        sqlx::query(sql)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let row = Self::fetch_row(&mut tx, id).await?;
        tx.commit().await?;
        Ok(row.into_task())
    }

    // ── voice events and users ───────────────────────────────────────────────

    pub async fn record_voice_event(&self, event: VoiceEventCreate) -> Result<i64, TaskStoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO voice_events (message, audio_url, zone, tone, created_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&event.message)
        .bind(&event.audio_url)
        .bind(&event.zone)
        .bind(&event.tone)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn create_user(&self, create: UserCreate) -> Result<User, TaskStoreError> {
        let user: User = sqlx::query_as(
            "INSERT INTO users (username, display_name, created_at)
             VALUES (?, ?, ?) RETURNING *",
        )
        .bind(&create.username)
        .bind(&create.display_name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, TaskStoreError> {
        let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn fetch_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: i64,
    ) -> Result<TaskRow, TaskStoreError> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.ok_or(TaskStoreError::NotFound)
    }
}

fn encode_task_type(task_type: &[String]) -> Option<String> {
    if task_type.is_empty() {
        None
    } else {
        serde_json::to_string(task_type).ok()
    }
}
