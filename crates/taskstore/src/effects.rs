//! Fire-and-forget side effects of the task lifecycle.
//!
//! None of these may fail the originating HTTP request: a wallet outage or a
//! bus with no listeners degrades to a warning log, and the task mutation
//! that triggered the effect stays committed.

use serde_json::json;
use tracing::{info, warn};

use soms_bus::Bus;

use crate::model::Task;

/// XP granted to zone devices when a task is created.
const XP_TASK_CREATED: i64 = 10;
/// XP granted to zone devices when a task is completed.
const XP_TASK_COMPLETED: i64 = 20;

#[derive(Clone)]
pub struct TaskEffects {
    http: reqwest::Client,
    ledger_url: String,
    bus: Option<Bus>,
}

impl TaskEffects {
    pub fn new(http: reqwest::Client, ledger_url: String, bus: Option<Bus>) -> Self {
        Self {
            http,
            ledger_url,
            bus,
        }
    }

    /// Device XP for the zone that produced a fresh task.
    pub async fn on_created(&self, task: &Task) {
        if let Some(zone) = &task.zone {
            self.grant_xp(zone, task.id, XP_TASK_CREATED, "task_created")
                .await;
        }
    }

    /// Completion effects: device XP, bounty payment, and the bus report.
    pub async fn on_completed(&self, task: &Task) {
        if let Some(zone) = &task.zone {
            self.grant_xp(zone, task.id, XP_TASK_COMPLETED, "task_completed")
                .await;
        }

        if let (Some(user_id), true) = (task.assigned_to, task.bounty_gold > 0) {
            let multiplier = match &task.zone {
                Some(zone) => self.zone_multiplier(zone).await,
                None => 1.0,
            };
            let amount = (task.bounty_gold as f64 * multiplier) as i64;
            let body = json!({
                "user_id": user_id,
                "amount": amount,
                "task_id": task.id,
                "description": format!("Task: {} ({multiplier:.1}x)", task.title),
            });
            let result = self
                .http
                .post(format!("{}/transactions/task-reward", self.ledger_url))
                .json(&body)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    info!(task = task.id, user_id, amount, "bounty paid");
                }
                Ok(response) => {
                    warn!(task = task.id, status = %response.status(), "bounty payment rejected");
                }
                Err(err) => warn!(task = task.id, %err, "bounty payment failed"),
            }
        }

        self.publish_report(task);
    }

    async fn grant_xp(&self, zone: &str, task_id: i64, xp_amount: i64, event_type: &str) {
        let body = json!({
            "zone": zone,
            "task_id": task_id,
            "xp_amount": xp_amount,
            "event_type": event_type,
        });
        if let Err(err) = self
            .http
            .post(format!("{}/devices/xp-grant", self.ledger_url))
            .json(&body)
            .send()
            .await
        {
            warn!(zone, task_id, %err, "device XP grant failed");
        }
    }

    /// Reward multiplier for a zone's devices; 1.0 on any failure.
    async fn zone_multiplier(&self, zone: &str) -> f64 {
        let url = format!("{}/devices/zone-multiplier/{zone}", self.ledger_url);
        let response = match self.http.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(zone, status = %r.status(), "zone multiplier fetch rejected");
                return 1.0;
            }
            Err(err) => {
                warn!(zone, %err, "zone multiplier fetch failed");
                return 1.0;
            }
        };
        response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("multiplier").and_then(|m| m.as_f64()))
            .unwrap_or(1.0)
    }

    /// `office/{zone}/task_report/{id}` for Brain consumption.
    fn publish_report(&self, task: &Task) {
        let Some(bus) = &self.bus else { return };
        let zone = task.zone.clone().unwrap_or_else(|| "main".to_string());
        let topic = format!("office/{zone}/task_report/{}", task.id);
        let payload = json!({
            "task_id": task.id,
            "title": task.title,
            "report_status": task.report_status,
            "completion_note": task.completion_note,
            "zone": zone,
        });
        let delivered = bus.publish(&topic, payload);
        info!(topic = %topic, delivered, "task report published");
    }
}
