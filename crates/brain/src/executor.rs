//! Validated tool execution.
//!
//! Every invocation passes through the [`Sanitizer`] first; a rejection
//! becomes the tool result the LLM sees, and nothing else happens. Handlers
//! return plain strings — that text is exactly what goes back into the
//! conversation as the `tool` message.

use serde_json::json;
use tracing::{info, warn};

use soms_world::WorldModel;

use crate::clients::{TaskApiClient, TaskCreatePayload, VoiceApiClient};
use crate::mcp::McpBridge;
use crate::sanitizer::Sanitizer;
use crate::scheduler::{should_dispatch_now, DispatchQuery, QueuedTask, TaskScheduler};
use crate::tools::{CreateTaskArgs, DeviceCommandArgs, SpeakArgs, ToolInvocation};

/// Result of one tool execution, fed back to the LLM verbatim.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
}

impl ToolOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub struct ToolExecutor {
    tasks: TaskApiClient,
    voice: VoiceApiClient,
    mcp: McpBridge,
    active_hours: (u32, u32),
}

impl ToolExecutor {
    pub fn new(
        tasks: TaskApiClient,
        voice: VoiceApiClient,
        mcp: McpBridge,
        active_hours: (u32, u32),
    ) -> Self {
        Self {
            tasks,
            voice,
            mcp,
            active_hours,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        invocation: &ToolInvocation,
        world: &WorldModel,
        sanitizer: &mut Sanitizer,
        scheduler: &mut TaskScheduler,
        local_hour: u32,
        now: f64,
    ) -> ToolOutcome {
        if let Err(reason) = sanitizer.validate(invocation, now) {
            warn!(tool = invocation.kind().name(), reason = %reason, "tool call rejected");
            return ToolOutcome::err(reason);
        }

        match invocation {
            ToolInvocation::CreateTask(args) => {
                self.create_task(args, world, sanitizer, scheduler, local_hour, now)
                    .await
            }
            ToolInvocation::Speak(args) => self.speak(args, sanitizer, now).await,
            ToolInvocation::SendDeviceCommand(args) => self.device_command(args).await,
            ToolInvocation::GetZoneStatus { zone_id } => zone_status(world, zone_id),
            ToolInvocation::GetActiveTasks => self.active_tasks().await,
        }
    }

    async fn create_task(
        &self,
        args: &CreateTaskArgs,
        world: &WorldModel,
        sanitizer: &mut Sanitizer,
        scheduler: &mut TaskScheduler,
        local_hour: u32,
        now: f64,
    ) -> ToolOutcome {
        let query = DispatchQuery {
            urgency: args.urgency,
            zone: args.zone.as_deref(),
            min_people_required: 1,
            interruptible: true,
        };
        let (dispatch, reason) = should_dispatch_now(world, &query, local_hour, self.active_hours);
        info!(title = %args.title, dispatch, reason = %reason, "dispatch decision");

        // Voice data is generated before creation so dedup merges can keep
        // or refresh it; failure just leaves the voice fields empty.
        let location = args.zone.clone().unwrap_or_else(|| "Office".to_string());
        let voice = self
            .voice
            .announce_with_completion(&json!({
                "title": args.title,
                "description": args.description,
                "location": location,
                "bounty_gold": args.bounty,
                "urgency": args.urgency,
                "zone": args.zone,
                "task_type": args.task_types(),
            }))
            .await;
        if voice.is_none() {
            warn!(title = %args.title, "task will be created without voice data");
        }

        let payload = TaskCreatePayload {
            title: args.title.clone(),
            description: args.description.clone(),
            location: Some(location),
            zone: args.zone.clone(),
            task_type: args.task_types(),
            bounty_gold: args.bounty,
            urgency: args.urgency,
            is_queued: !dispatch,
            announcement_audio_url: voice.as_ref().map(|v| v.announcement_audio_url.clone()),
            announcement_text: voice.as_ref().map(|v| v.announcement_text.clone()),
            completion_audio_url: voice.as_ref().map(|v| v.completion_audio_url.clone()),
            completion_text: voice.as_ref().map(|v| v.completion_text.clone()),
        };

        match self.tasks.create_task(&payload).await {
            Ok(task) => {
                sanitizer.record_task_created(now);
                if !dispatch {
                    scheduler.enqueue(QueuedTask {
                        task_id: task.id,
                        title: args.title.clone(),
                        urgency: args.urgency,
                        zone: args.zone.clone(),
                        min_people_required: 1,
                        estimated_duration: 10,
                        created_at: now,
                        deadline: None,
                    });
                }
                ToolOutcome::ok(format!(
                    "Created task '{}' (ID: {}, bounty: {}pt{})",
                    args.title,
                    task.id,
                    args.bounty,
                    if dispatch { "" } else { ", queued" },
                ))
            }
            Err(err) => {
                warn!(%err, "task creation failed");
                ToolOutcome::err(format!("Task creation failed: {err}"))
            }
        }
    }

    async fn speak(&self, args: &SpeakArgs, sanitizer: &mut Sanitizer, now: f64) -> ToolOutcome {
        let audio_url = self.voice.synthesize(&args.message).await;
        if audio_url.is_none() {
            warn!("speak proceeds without audio (synthesis failed)");
        }
        self.tasks
            .record_voice_event(
                &args.message,
                audio_url.as_deref(),
                args.zone.as_deref(),
                &args.tone,
            )
            .await;
        sanitizer.record_speak(args.cooldown_zone(), now);
        ToolOutcome::ok(format!("Announced: \"{}\"", args.message))
    }

    async fn device_command(&self, args: &DeviceCommandArgs) -> ToolOutcome {
        match self
            .mcp
            .call_tool(&args.agent_id, &args.tool_name, args.arguments.clone())
            .await
        {
            Ok(result) => ToolOutcome::ok(format!(
                "Device command complete: {}/{} -> {result}",
                args.agent_id, args.tool_name
            )),
            Err(err) => ToolOutcome::err(format!("Device command failed: {err}")),
        }
    }

    async fn active_tasks(&self) -> ToolOutcome {
        match self.tasks.active_tasks().await {
            Ok(tasks) if tasks.is_empty() => ToolOutcome::ok("No active tasks"),
            Ok(tasks) => {
                let lines: Vec<String> = tasks
                    .iter()
                    .take(10)
                    .map(|t| {
                        let zone = t
                            .zone
                            .as_deref()
                            .map(|z| format!(", zone: {z}"))
                            .unwrap_or_default();
                        let types = if t.task_type.is_empty() {
                            String::new()
                        } else {
                            format!(", type: {}", t.task_type.join(","))
                        };
                        format!("- {} (open{zone}{types})", t.title)
                    })
                    .collect();
                ToolOutcome::ok(format!(
                    "Active tasks ({}):\n{}",
                    tasks.len(),
                    lines.join("\n")
                ))
            }
            Err(err) => ToolOutcome::err(format!("Failed to fetch tasks: {err}")),
        }
    }
}

/// Detailed single-zone report for the `get_zone_status` query tool.
fn zone_status(world: &WorldModel, zone_id: &str) -> ToolOutcome {
    let Some(zone) = world.get_zone(zone_id) else {
        return ToolOutcome::err(format!("Zone '{zone_id}' not found"));
    };

    let mut lines = vec![format!("Zone: {zone_id}")];
    if zone.occupancy.person_count > 0 {
        lines.push(format!(
            "Occupancy: {} ({})",
            zone.occupancy.person_count,
            zone.occupancy.activity_summary()
        ));
    } else {
        lines.push("Occupancy: empty".to_string());
    }

    let env = &zone.environment;
    if let Some(t) = env.temperature {
        lines.push(format!("Temperature: {t:.1}°C ({})", env.thermal_comfort()));
    }
    if let Some(h) = env.humidity {
        lines.push(format!("Humidity: {h:.0}%"));
    }
    if let Some(ppm) = env.co2 {
        let marker = if env.is_stuffy() { " (ventilation needed)" } else { "" };
        lines.push(format!("CO2: {ppm}ppm{marker}"));
    }
    if let Some(lux) = env.illuminance {
        lines.push(format!("Illuminance: {lux:.0}lux"));
    }
    for (device_id, device) in &zone.devices {
        lines.push(format!(
            "Device {}({device_id}): {}",
            device.device_type, device.power_state
        ));
    }
    ToolOutcome::ok(lines.join("\n"))
}
