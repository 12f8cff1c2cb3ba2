//! The cognitive core: an event-driven ReAct loop over the world model.
//!
//! Bus messages feed the [`WorldModel`]; new events wake the cycle (with a
//! short batching window), and a timer covers quiet periods. Each cycle
//! builds the LLM conversation, lets the model propose tool calls, filters
//! and validates them, executes sequentially, and feeds results back until
//! the model stops or a guard trips. All shared state lives on this task —
//! the bus only ever hands us messages through a channel.

pub mod clients;
pub mod executor;
pub mod history;
pub mod mcp;
pub mod prompt;
pub mod reminder;
pub mod sanitizer;
pub mod scheduler;
pub mod tools;

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use chrono::Timelike;
use serde_json::Value;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use soms_bus::Bus;
use soms_config::{BrainConfig, LlmConfig};
use soms_llm::{ChatClient, ChatMessage, ToolCall, ToolCallFunction};
use soms_world::{unix_now, WorldModel};

use crate::clients::{TaskApiClient, VoiceApiClient};
use crate::executor::{ToolExecutor, ToolOutcome};
use crate::history::ActionHistory;
use crate::mcp::McpBridge;
use crate::prompt::CycleInputs;
use crate::reminder::TaskReminder;
use crate::sanitizer::Sanitizer;
use crate::scheduler::TaskScheduler;
use crate::tools::ToolInvocation;

pub struct Brain {
    config: BrainConfig,
    llm: ChatClient,
    bus: Bus,
    world: WorldModel,
    sanitizer: Sanitizer,
    scheduler: TaskScheduler,
    executor: ToolExecutor,
    history: ActionHistory,
    tasks: TaskApiClient,
    reminder: Option<TaskReminder>,
    last_cycle_at: f64,
}

impl Brain {
    pub fn new(
        config: BrainConfig,
        llm_config: LlmConfig,
        bus: Bus,
        http: reqwest::Client,
    ) -> Result<Self> {
        let tasks = TaskApiClient::new(http.clone(), config.taskstore_url.clone());
        let voice = VoiceApiClient::new(http.clone(), config.voice_url.clone());
        let mcp = McpBridge::start(bus.clone())?;
        let active_hours = (config.active_hours_start, config.active_hours_end);
        let reminder = TaskReminder::new(
            http.clone(),
            config.taskstore_url.clone(),
            config.voice_url.clone(),
        );
        Ok(Self {
            llm: ChatClient::new(http, llm_config),
            executor: ToolExecutor::new(tasks.clone(), voice, mcp, active_hours),
            tasks,
            reminder: Some(reminder),
            bus,
            world: WorldModel::new(),
            sanitizer: Sanitizer::default(),
            scheduler: TaskScheduler::default(),
            history: ActionHistory::default(),
            last_cycle_at: 0.0,
            config,
        })
    }

    /// Main loop: consume bus messages, wake on events or the polling
    /// timer, and run paced cognitive cycles until the bus closes.
    pub async fn run(mut self) -> Result<()> {
        let mut office = self.bus.subscribe("office/#")?;
        let cycle_interval = Duration::from_secs(self.config.cycle_interval_secs);
        let batch_delay = Duration::from_secs(self.config.event_batch_delay_secs);
        if let Some(reminder) = self.reminder.take() {
            tokio::spawn(reminder.run());
        }
        info!("Brain is running (ReAct mode)");

        let mut next_poll = Instant::now() + cycle_interval;
        loop {
            let triggered = tokio::select! {
                maybe = office.recv() => match maybe {
                    Some(message) => !self
                        .world
                        .update_from_message(&message.topic, &message.payload)
                        .is_empty(),
                    None => break,
                },
                _ = tokio::time::sleep_until(next_poll) => true,
            };
            if !triggered {
                continue;
            }

            // Batch: absorb the burst before thinking about it.
            let deadline = Instant::now() + batch_delay;
            loop {
                tokio::select! {
                    maybe = office.recv() => match maybe {
                        Some(message) => {
                            self.world.update_from_message(&message.topic, &message.payload);
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }

            self.paced_cycle().await;
            next_poll = Instant::now() + cycle_interval;
        }
        Ok(())
    }

    /// Enforce the minimum interval, then run one cycle. Cycle errors are
    /// contained here so the loop never dies.
    async fn paced_cycle(&mut self) {
        let elapsed = unix_now() - self.last_cycle_at;
        let min_interval = self.config.min_cycle_interval_secs as f64;
        if elapsed < min_interval {
            tokio::time::sleep(Duration::from_secs_f64(min_interval - elapsed)).await;
        }
        if let Err(err) = self.cognitive_cycle().await {
            error!(%err, "cognitive cycle error");
        }
        self.last_cycle_at = unix_now();
    }

    /// One Think → Act → Observe cycle.
    pub async fn cognitive_cycle(&mut self) -> Result<()> {
        let now = unix_now();
        let local_hour = chrono::Local::now().hour();
        let active_hours = (self.config.active_hours_start, self.config.active_hours_end);

        // Re-evaluate held-back tasks first.
        let ready = self
            .scheduler
            .process_queue(&self.world, local_hour, active_hours, now);
        for task in ready {
            if let Err(err) = self.tasks.dispatch(task.task_id).await {
                warn!(task = task.task_id, %err, "queued-task dispatch failed");
            }
        }

        let context = self.world.llm_context();
        if context.is_empty() {
            return Ok(());
        }
        let recent_events = self.world.recent_events(300.0, now);
        let active_tasks = match self.tasks.active_tasks().await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(%err, "active-task fetch failed; continuing without");
                Vec::new()
            }
        };

        let user_message = prompt::build_user_message(&CycleInputs {
            world_context: &context,
            recent_events: &recent_events,
            active_tasks: &active_tasks,
            history: &self.history,
            now,
        });
        let mut messages = vec![
            ChatMessage::system(prompt::SYSTEM_PROMPT),
            ChatMessage::user(user_message),
        ];
        let tool_definitions = tools::tool_definitions();

        let mut seen_calls: HashSet<String> = HashSet::new();
        let mut speak_count = 0usize;
        let mut consecutive_errors = 0usize;

        for iteration in 1..=self.config.react_max_iterations {
            info!(iteration, max = self.config.react_max_iterations, "ReAct iteration");

            let response = match self.llm.chat(&messages, Some(&tool_definitions)).await {
                Ok(response) => response,
                Err(err) => {
                    error!(%err, "LLM call failed");
                    break;
                }
            };

            if response.tool_calls.is_empty() {
                if !response.content.is_empty() {
                    info!(content = %truncate(&response.content, 200), "LLM chose no action");
                }
                break;
            }

            let accepted = filter_tool_calls(
                response.tool_calls,
                &mut seen_calls,
                &mut speak_count,
                self.config.max_speak_per_cycle,
            );
            if accepted.is_empty() {
                info!("all tool calls filtered out, ending cycle");
                break;
            }

            messages.push(assistant_message_with_calls(response.content, &accepted));

            let mut cycle_aborted = false;
            for call in &accepted {
                let args = call.function.args();
                let outcome = match ToolInvocation::parse(&call.function.name, &args) {
                    Ok(invocation) => {
                        info!(tool = invocation.kind().name(), "executing tool");
                        let outcome = self
                            .executor
                            .execute(
                                &invocation,
                                &self.world,
                                &mut self.sanitizer,
                                &mut self.scheduler,
                                local_hour,
                                unix_now(),
                            )
                            .await;
                        self.history.record(
                            unix_now(),
                            invocation.kind().name(),
                            invocation.summary(),
                            outcome.success,
                        );
                        outcome
                    }
                    Err(err) => {
                        warn!(%err, "unparseable tool call");
                        self.history
                            .record(unix_now(), &call.function.name, String::new(), false);
                        ToolOutcome {
                            success: false,
                            message: err.to_string(),
                        }
                    }
                };

                if outcome.success {
                    consecutive_errors = 0;
                } else {
                    consecutive_errors += 1;
                }
                messages.push(ChatMessage::tool_result(&call.id, &outcome.message));

                if consecutive_errors >= self.config.max_consecutive_errors {
                    warn!(consecutive_errors, "stopping cycle on consecutive tool errors");
                    cycle_aborted = true;
                    break;
                }
            }
            if cycle_aborted {
                break;
            }
        }

        self.history.prune(unix_now());
        info!("cycle complete");
        Ok(())
    }
}

// ── per-cycle tool-call guards ───────────────────────────────────────────────

/// Drop duplicate (name, args) pairs already executed this cycle and cap
/// `speak` calls. `seen` and `speak_count` persist across ReAct iterations
/// of the same cycle.
pub fn filter_tool_calls(
    calls: Vec<ToolCall>,
    seen: &mut HashSet<String>,
    speak_count: &mut usize,
    max_speak: usize,
) -> Vec<ToolCall> {
    let mut accepted = Vec::new();
    for call in calls {
        let key = format!(
            "{}:{}",
            call.function.name,
            canonical_json(&call.function.args())
        );
        if seen.contains(&key) {
            warn!(tool = %call.function.name, "skipping duplicate tool call");
            continue;
        }
        if call.function.name == "speak" {
            if *speak_count >= max_speak {
                warn!("skipping speak: per-cycle cap reached");
                continue;
            }
            *speak_count += 1;
        }
        seen.insert(key);
        accepted.push(call);
    }
    accepted
}

/// Key-order-independent rendering for duplicate detection.
fn canonical_json(value: &Value) -> String {
    fn normalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, normalize(v))).collect();
                serde_json::to_value(sorted).unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
            other => other.clone(),
        }
    }
    normalize(value).to_string()
}

/// Assistant message carrying the accepted calls, with arguments re-encoded
/// as JSON strings for the OpenAI wire format.
fn assistant_message_with_calls(content: String, calls: &[ToolCall]) -> ChatMessage {
    let wire_calls = calls
        .iter()
        .map(|call| ToolCall {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: ToolCallFunction {
                name: call.function.name.clone(),
                arguments: Value::String(call.function.args().to_string()),
            },
        })
        .collect();
    let content = if content.is_empty() { None } else { Some(content) };
    ChatMessage::assistant_tool_calls(content, wire_calls)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            r#type: "function".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: args,
            },
        }
    }

    #[test]
    fn duplicate_calls_within_a_cycle_are_dropped() {
        let mut seen = HashSet::new();
        let mut speak_count = 0;
        let calls = vec![
            call("1", "speak", json!({"message": "x", "zone": "main"})),
            call("2", "speak", json!({"zone": "main", "message": "x"})),
        ];
        let accepted = filter_tool_calls(calls, &mut seen, &mut speak_count, 5);
        // Key order differs but the canonical key matches: one survives.
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].id, "1");
    }

    #[test]
    fn duplicates_are_dropped_across_iterations() {
        let mut seen = HashSet::new();
        let mut speak_count = 0;
        let first = filter_tool_calls(
            vec![call("1", "create_task", json!({"title": "T"}))],
            &mut seen,
            &mut speak_count,
            1,
        );
        assert_eq!(first.len(), 1);
        // Same call in a later iteration of the same cycle is filtered.
        let second = filter_tool_calls(
            vec![call("2", "create_task", json!({"title": "T"}))],
            &mut seen,
            &mut speak_count,
            1,
        );
        assert!(second.is_empty());
    }

    #[test]
    fn speak_cap_allows_distinct_messages_up_to_limit() {
        let mut seen = HashSet::new();
        let mut speak_count = 0;
        let calls = vec![
            call("1", "speak", json!({"message": "a"})),
            call("2", "speak", json!({"message": "b"})),
            call("3", "get_active_tasks", json!({})),
        ];
        let accepted = filter_tool_calls(calls, &mut seen, &mut speak_count, 1);
        let names: Vec<&str> = accepted.iter().map(|c| c.function.name.as_str()).collect();
        // Second speak is over the cap; the query tool passes.
        assert_eq!(names, vec!["speak", "get_active_tasks"]);
    }

    #[test]
    fn canonical_json_ignores_key_order_recursively() {
        let a = json!({"b": {"y": 2, "x": 1}, "a": [1, {"q": 1, "p": 2}]});
        let b = json!({"a": [1, {"p": 2, "q": 1}], "b": {"x": 1, "y": 2}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_ne!(canonical_json(&a), canonical_json(&json!({"a": 1})));
    }

    #[test]
    fn assistant_message_re_encodes_arguments_as_strings() {
        let calls = vec![call("1", "speak", json!({"message": "hello"}))];
        let message = assistant_message_with_calls("thinking".to_string(), &calls);
        assert_eq!(message.content.as_deref(), Some("thinking"));
        let Value::String(raw) = &message.tool_calls[0].function.arguments else {
            panic!("arguments should be a JSON string");
        };
        assert_eq!(
            serde_json::from_str::<Value>(raw).unwrap()["message"],
            "hello"
        );
    }
}
