//! Assembly of the per-cycle LLM conversation.
//!
//! The system prompt is fixed; the user message carries the world snapshot,
//! recent events, actionable reports, the active-task list, and the
//! anti-repetition action history. Each block is built by its own function
//! so tests can check sections independently.

use soms_world::Event;

use crate::clients::TaskSummary;
use crate::history::ActionHistory;

/// Fixed system prompt for the cognitive cycle.
pub const SYSTEM_PROMPT: &str = "\
You are SOMS, the autonomous management AI of a small office. You watch \
sensor data, occupancy, and device state across zones, and you act through \
the provided tools: create human-facing tasks, control devices, speak \
announcements, and query state.

Principles:
- Act only when the situation calls for it. Most cycles need no action.
- Prefer device commands for things machines can fix (temperature, lights); \
create tasks for things that need human hands.
- Never create a task whose purpose duplicates an existing active task.
- Keep spoken announcements short, polite, and rare.
- When a task report says follow-up is needed, address it.";

/// All inputs the user message is assembled from.
pub struct CycleInputs<'a> {
    pub world_context: &'a str,
    /// (zone_id, event) pairs from the last five minutes.
    pub recent_events: &'a [(String, Event)],
    pub active_tasks: &'a [TaskSummary],
    pub history: &'a ActionHistory,
    pub now: f64,
}

pub fn build_user_message(inputs: &CycleInputs<'_>) -> String {
    let mut message = format!("## Current office state\n{}", inputs.world_context);

    let events_block = build_events_block(inputs.recent_events);
    if !events_block.is_empty() {
        message.push_str("\n\n## Recent events\n");
        message.push_str(&events_block);
    }

    let reports_block = build_actionable_reports_block(inputs.recent_events);
    if !reports_block.is_empty() {
        message.push_str("\n\n## Task reports requiring action\n");
        message.push_str(&reports_block);
        message.push_str(
            "\nThe reports above need follow-up. Review them and respond appropriately.",
        );
    }

    message.push_str("\n\n");
    message.push_str(&build_active_tasks_block(inputs.active_tasks));

    if let Some(block) = inputs.history.prompt_block(inputs.now) {
        message.push_str("\n\n");
        message.push_str(&block);
    }

    message
}

fn build_events_block(events: &[(String, Event)]) -> String {
    events
        .iter()
        .map(|(zone, event)| format!("[{zone}] {}", event.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// task_report events whose status demands follow-up.
fn build_actionable_reports_block(events: &[(String, Event)]) -> String {
    events
        .iter()
        .filter(|(_, event)| {
            event.event_type == "task_report"
                && matches!(
                    event.data.get("report_status").and_then(|s| s.as_str()),
                    Some("needs_followup") | Some("cannot_resolve")
                )
        })
        .map(|(zone, event)| format!("[{zone}] {} (action required)", event.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_active_tasks_block(tasks: &[TaskSummary]) -> String {
    if tasks.is_empty() {
        return "## Active tasks\nnone".to_string();
    }
    let mut block = String::from("## Active tasks (do not create duplicates)\n");
    for task in tasks.iter().take(10) {
        let zone = task
            .zone
            .as_deref()
            .map(|z| format!(" [{z}]"))
            .unwrap_or_default();
        let types = if task.task_type.is_empty() {
            String::new()
        } else {
            format!(" ({})", task.task_type.join(","))
        };
        block.push_str(&format!("- {}{zone}{types}\n", task.title));
    }
    block.push_str("Do not create a new task with the same purpose as any task above.");
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use soms_world::EventSeverity;

    fn report_event(status: &str) -> (String, Event) {
        (
            "main".to_string(),
            Event::new(
                100.0,
                "task_report",
                EventSeverity::Warning,
                json!({"title": "Fix printer", "report_status": status}),
            ),
        )
    }

    fn task(title: &str, zone: Option<&str>) -> TaskSummary {
        TaskSummary {
            id: 1,
            title: title.to_string(),
            zone: zone.map(str::to_string),
            task_type: vec!["supply".to_string()],
            is_completed: false,
        }
    }

    #[test]
    fn empty_task_list_renders_none() {
        let history = ActionHistory::default();
        let inputs = CycleInputs {
            world_context: "### main\n- status: unoccupied\n",
            recent_events: &[],
            active_tasks: &[],
            history: &history,
            now: 0.0,
        };
        let message = build_user_message(&inputs);
        assert!(message.contains("## Active tasks\nnone"));
        assert!(!message.contains("## Recent events"));
    }

    #[test]
    fn actionable_reports_are_flagged() {
        let history = ActionHistory::default();
        let events = vec![report_event("needs_followup"), report_event("no_issue")];
        let inputs = CycleInputs {
            world_context: "ctx",
            recent_events: &events,
            active_tasks: &[],
            history: &history,
            now: 0.0,
        };
        let message = build_user_message(&inputs);
        assert!(message.contains("## Task reports requiring action"));
        // Only the needs_followup report lands in the actionable section.
        let actionable = message
            .split("## Task reports requiring action")
            .nth(1)
            .unwrap();
        assert_eq!(actionable.matches("Fix printer").count(), 1);
    }

    #[test]
    fn active_tasks_warn_about_duplicates() {
        let history = ActionHistory::default();
        let tasks = vec![task("Refill beans", Some("kitchen"))];
        let inputs = CycleInputs {
            world_context: "ctx",
            recent_events: &[],
            active_tasks: &tasks,
            history: &history,
            now: 0.0,
        };
        let message = build_user_message(&inputs);
        assert!(message.contains("- Refill beans [kitchen] (supply)"));
        assert!(message.contains("same purpose"));
    }

    #[test]
    fn action_history_block_is_included() {
        let mut history = ActionHistory::default();
        history.record(0.0, "speak", "zone=main, msg=hello".to_string(), true);
        let inputs = CycleInputs {
            world_context: "ctx",
            recent_events: &[],
            active_tasks: &[],
            history: &history,
            now: 60.0,
        };
        let message = build_user_message(&inputs);
        assert!(message.contains("Recent Brain actions"));
        assert!(message.contains("speak(zone=main, msg=hello)"));
    }
}
