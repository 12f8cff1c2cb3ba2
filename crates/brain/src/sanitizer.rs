//! Policy enforcement in front of every tool side effect.
//!
//! The sanitizer rejects before anything happens; successful executions are
//! reported back so rate and cooldown counters only advance for actions
//! that actually took place.

use std::collections::HashMap;

use tracing::warn;

use crate::tools::ToolInvocation;

/// Hard cap on task bounties.
const MAX_BOUNTY: i64 = 5000;
/// Rolling-hour cap on task creations.
const MAX_TASKS_PER_HOUR: usize = 10;
/// Seconds a zone stays quiet after a speak.
const SPEAK_COOLDOWN_SECS: f64 = 300.0;
/// Safe set-point range for HVAC commands (°C).
const TEMPERATURE_RANGE: (f64, f64) = (18.0, 28.0);
/// Longest permitted pump run (seconds).
const MAX_PUMP_DURATION_SECS: f64 = 60.0;

#[derive(Debug)]
pub struct Sanitizer {
    allowed_devices: Vec<String>,
    task_creation_times: Vec<f64>,
    last_speak_per_zone: HashMap<String, f64>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            allowed_devices: vec![
                "light_01".to_string(),
                "pump_01".to_string(),
                "window_01".to_string(),
            ],
            task_creation_times: Vec::new(),
            last_speak_per_zone: HashMap::new(),
        }
    }
}

impl Sanitizer {
    pub fn with_allowed_devices(devices: Vec<String>) -> Self {
        Self {
            allowed_devices: devices,
            ..Self::default()
        }
    }

    /// Validate a tool call before execution. `Err` carries the rejection
    /// reason fed back to the LLM.
    pub fn validate(&mut self, invocation: &ToolInvocation, now: f64) -> Result<(), String> {
        match invocation {
            ToolInvocation::CreateTask(args) => {
                if args.bounty > MAX_BOUNTY {
                    warn!(bounty = args.bounty, "rejected: bounty above cap");
                    return Err(format!(
                        "Bounty {} exceeds maximum of {MAX_BOUNTY}",
                        args.bounty
                    ));
                }
                if !(0..=4).contains(&args.urgency) {
                    warn!(urgency = args.urgency, "rejected: urgency out of range");
                    return Err(format!("Urgency {} must be between 0 and 4", args.urgency));
                }
                self.task_creation_times
                    .retain(|t| now - t < 3600.0);
                if self.task_creation_times.len() >= MAX_TASKS_PER_HOUR {
                    warn!("rejected: task creation rate limit");
                    return Err(format!(
                        "Rate limit exceeded: {MAX_TASKS_PER_HOUR} tasks per hour"
                    ));
                }
                Ok(())
            }
            ToolInvocation::Speak(args) => {
                if args.message.trim().is_empty() {
                    return Err("Speak message must not be empty".to_string());
                }
                let zone = args.cooldown_zone();
                if let Some(last) = self.last_speak_per_zone.get(zone) {
                    let elapsed = now - last;
                    if elapsed < SPEAK_COOLDOWN_SECS {
                        warn!(zone, elapsed, "rejected: speak cooldown");
                        return Err(format!(
                            "Zone '{zone}' was addressed {elapsed:.0}s ago; wait {SPEAK_COOLDOWN_SECS:.0}s between announcements"
                        ));
                    }
                }
                Ok(())
            }
            ToolInvocation::SendDeviceCommand(args) => {
                let allowed = args.agent_id.starts_with("swarm_hub")
                    || self.allowed_devices.iter().any(|d| d == &args.agent_id);
                if !allowed {
                    warn!(agent = %args.agent_id, "rejected: unknown device");
                    return Err(format!("Device '{}' is not in the allow-list", args.agent_id));
                }
                if args.tool_name == "set_temperature" {
                    if let Some(temp) = args.arguments.get("temperature").and_then(|v| v.as_f64())
                    {
                        let (low, high) = TEMPERATURE_RANGE;
                        if !(low..=high).contains(&temp) {
                            warn!(temp, "rejected: temperature out of bounds");
                            return Err(format!(
                                "Temperature {temp}°C out of safe range [{low}-{high}°C]"
                            ));
                        }
                    }
                }
                if args.tool_name == "run_pump" {
                    if let Some(duration) = args.arguments.get("duration").and_then(|v| v.as_f64())
                    {
                        if duration > MAX_PUMP_DURATION_SECS {
                            warn!(duration, "rejected: pump duration");
                            return Err(format!(
                                "Pump duration {duration}s exceeds maximum {MAX_PUMP_DURATION_SECS}s"
                            ));
                        }
                    }
                }
                Ok(())
            }
            // Query tools carry no side effects.
            ToolInvocation::GetZoneStatus { .. } | ToolInvocation::GetActiveTasks => Ok(()),
        }
    }

    /// Record a create_task that actually went through.
    pub fn record_task_created(&mut self, now: f64) {
        self.task_creation_times.push(now);
    }

    /// Record a successful speak; starts the zone cooldown.
    pub fn record_speak(&mut self, zone: &str, now: f64) {
        self.last_speak_per_zone.insert(zone.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CreateTaskArgs, DeviceCommandArgs, SpeakArgs};
    use serde_json::json;

    fn create_task(bounty: i64, urgency: i64) -> ToolInvocation {
        ToolInvocation::CreateTask(CreateTaskArgs {
            title: "T".to_string(),
            description: String::new(),
            bounty,
            urgency,
            zone: None,
            task_types_csv: "general".to_string(),
        })
    }

    fn speak(zone: Option<&str>, message: &str) -> ToolInvocation {
        ToolInvocation::Speak(SpeakArgs {
            message: message.to_string(),
            zone: zone.map(str::to_string),
            tone: "neutral".to_string(),
        })
    }

    fn device(agent: &str, tool: &str, arguments: serde_json::Value) -> ToolInvocation {
        ToolInvocation::SendDeviceCommand(DeviceCommandArgs {
            agent_id: agent.to_string(),
            tool_name: tool.to_string(),
            arguments,
        })
    }

    #[test]
    fn bounty_and_urgency_limits() {
        let mut sanitizer = Sanitizer::default();
        assert!(sanitizer.validate(&create_task(5000, 4), 0.0).is_ok());
        assert!(sanitizer.validate(&create_task(5001, 2), 0.0).is_err());
        assert!(sanitizer.validate(&create_task(100, 5), 0.0).is_err());
        assert!(sanitizer.validate(&create_task(100, -1), 0.0).is_err());
    }

    #[test]
    fn task_rate_limit_is_a_rolling_hour() {
        let mut sanitizer = Sanitizer::default();
        for i in 0..10 {
            assert!(sanitizer.validate(&create_task(100, 2), i as f64).is_ok());
            sanitizer.record_task_created(i as f64);
        }
        // Eleventh within the hour is rejected.
        assert!(sanitizer.validate(&create_task(100, 2), 100.0).is_err());
        // Once the window slides past the old creations, it opens again.
        assert!(sanitizer.validate(&create_task(100, 2), 3700.0).is_ok());
    }

    #[test]
    fn rejected_tasks_do_not_consume_rate_allowance() {
        let mut sanitizer = Sanitizer::default();
        for _ in 0..20 {
            assert!(sanitizer.validate(&create_task(9999, 2), 0.0).is_err());
        }
        assert!(sanitizer.validate(&create_task(100, 2), 1.0).is_ok());
    }

    #[test]
    fn speak_requires_message_and_respects_cooldown() {
        let mut sanitizer = Sanitizer::default();
        assert!(sanitizer.validate(&speak(Some("main"), "  "), 0.0).is_err());

        assert!(sanitizer.validate(&speak(Some("main"), "hi"), 0.0).is_ok());
        sanitizer.record_speak("main", 0.0);

        // Within 300 s: rejected for the same zone, fine for another.
        assert!(sanitizer.validate(&speak(Some("main"), "hi"), 200.0).is_err());
        assert!(sanitizer.validate(&speak(Some("kitchen"), "hi"), 200.0).is_ok());

        // After the cooldown the zone opens again.
        assert!(sanitizer.validate(&speak(Some("main"), "hi"), 301.0).is_ok());
    }

    #[test]
    fn zoneless_speak_shares_the_general_bucket() {
        let mut sanitizer = Sanitizer::default();
        assert!(sanitizer.validate(&speak(None, "hi"), 0.0).is_ok());
        sanitizer.record_speak("general", 0.0);
        assert!(sanitizer.validate(&speak(None, "hi again"), 100.0).is_err());
    }

    #[test]
    fn device_allow_list_and_swarm_prefix() {
        let mut sanitizer = Sanitizer::default();
        assert!(sanitizer
            .validate(&device("light_01", "toggle_light", json!({})), 0.0)
            .is_ok());
        assert!(sanitizer
            .validate(&device("swarm_hub_42", "ping", json!({})), 0.0)
            .is_ok());
        assert!(sanitizer
            .validate(&device("toaster_99", "burn", json!({})), 0.0)
            .is_err());
    }

    #[test]
    fn temperature_and_pump_limits() {
        let mut sanitizer = Sanitizer::default();
        let hvac = |temp: f64| device("swarm_hub_01", "set_temperature", json!({"temperature": temp}));
        assert!(sanitizer.validate(&hvac(24.0), 0.0).is_ok());
        assert!(sanitizer.validate(&hvac(18.0), 0.0).is_ok());
        assert!(sanitizer.validate(&hvac(28.0), 0.0).is_ok());
        assert!(sanitizer.validate(&hvac(17.9), 0.0).is_err());
        assert!(sanitizer.validate(&hvac(30.0), 0.0).is_err());

        let pump = |secs: f64| device("pump_01", "run_pump", json!({"duration": secs}));
        assert!(sanitizer.validate(&pump(60.0), 0.0).is_ok());
        assert!(sanitizer.validate(&pump(61.0), 0.0).is_err());
    }
}
