//! The Brain's tool set as a closed union.
//!
//! Both the OpenAI-facing schema and dispatch derive from [`ToolKind`], so
//! adding a tool means touching this module and nothing else: the schema,
//! the parser, and the executor match on the same enum.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolParseError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool {tool}: missing required argument '{arg}'")]
    MissingArgument { tool: &'static str, arg: &'static str },
}

/// Every tool exposed to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CreateTask,
    SendDeviceCommand,
    Speak,
    GetZoneStatus,
    GetActiveTasks,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::CreateTask,
        ToolKind::SendDeviceCommand,
        ToolKind::Speak,
        ToolKind::GetZoneStatus,
        ToolKind::GetActiveTasks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::CreateTask => "create_task",
            ToolKind::SendDeviceCommand => "send_device_command",
            ToolKind::Speak => "speak",
            ToolKind::GetZoneStatus => "get_zone_status",
            ToolKind::GetActiveTasks => "get_active_tasks",
        }
    }

    fn definition(self) -> Value {
        let (description, parameters) = match self {
            ToolKind::CreateTask => (
                "Create a human-facing task on the dashboard when an office \
                 problem is detected. Set the bounty according to difficulty.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Short task title"},
                        "description": {"type": "string", "description": "What happened and what to do"},
                        "bounty": {"type": "integer", "description": "Reward points. Easy: 500-1000, medium: 1000-2000, heavy: 2000-5000"},
                        "urgency": {"type": "integer", "description": "0-4. 0: whenever, 1: low, 2: normal, 3: high, 4: critical"},
                        "zone": {"type": "string", "description": "Target zone (e.g. main, kitchen)"},
                        "task_types": {"type": "string", "description": "Comma-separated task types (e.g. environment,urgent)"}
                    },
                    "required": ["title", "description"]
                }),
            ),
            ToolKind::SendDeviceCommand => (
                "Send a command to an edge device agent (air conditioning, \
                 lights, windows, pumps).",
                json!({
                    "type": "object",
                    "properties": {
                        "agent_id": {"type": "string", "description": "Device agent id (e.g. light_01)"},
                        "tool_name": {"type": "string", "description": "Device tool to run (e.g. set_temperature, toggle_light)"},
                        "arguments": {"type": "string", "description": "Tool arguments as a JSON string (e.g. {\"temperature\": 24})"}
                    },
                    "required": ["agent_id", "tool_name"]
                }),
            ),
            ToolKind::Speak => (
                "Announce a short spoken message in the office. Use sparingly; \
                 the same zone cannot be addressed again for five minutes.",
                json!({
                    "type": "object",
                    "properties": {
                        "message": {"type": "string", "description": "What to say"},
                        "zone": {"type": "string", "description": "Target zone"},
                        "tone": {"type": "string", "description": "Speaking tone (neutral, friendly, urgent)"}
                    },
                    "required": ["message"]
                }),
            ),
            ToolKind::GetZoneStatus => (
                "Get detailed current state for one zone. Use when you need \
                 more information before deciding.",
                json!({
                    "type": "object",
                    "properties": {
                        "zone_id": {"type": "string", "description": "Zone id (e.g. main, kitchen)"}
                    },
                    "required": ["zone_id"]
                }),
            ),
            ToolKind::GetActiveTasks => (
                "List currently active tasks. Check before creating a task to \
                 avoid duplicates.",
                json!({"type": "object", "properties": {}}),
            ),
        };
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": description,
                "parameters": parameters,
            }
        })
    }
}

/// The OpenAI `tools` array for every tool in the union.
pub fn tool_definitions() -> Value {
    Value::Array(ToolKind::ALL.iter().map(|kind| kind.definition()).collect())
}

// ── typed invocations ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreateTaskArgs {
    pub title: String,
    pub description: String,
    pub bounty: i64,
    pub urgency: i64,
    pub zone: Option<String>,
    pub task_types_csv: String,
}

impl CreateTaskArgs {
    /// CSV → ordered set of non-empty trimmed type tags.
    pub fn task_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for raw in self.task_types_csv.split(',') {
            let tag = raw.trim();
            if !tag.is_empty() && !types.iter().any(|t| t == tag) {
                types.push(tag.to_string());
            }
        }
        types
    }
}

#[derive(Debug, Clone)]
pub struct DeviceCommandArgs {
    pub agent_id: String,
    pub tool_name: String,
    /// Inner tool arguments; arrives as a JSON string or object.
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct SpeakArgs {
    pub message: String,
    pub zone: Option<String>,
    pub tone: String,
}

impl SpeakArgs {
    /// Cooldown bucket for this speak call.
    pub fn cooldown_zone(&self) -> &str {
        self.zone.as_deref().unwrap_or("general")
    }
}

/// A validated, typed tool call.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    CreateTask(CreateTaskArgs),
    SendDeviceCommand(DeviceCommandArgs),
    Speak(SpeakArgs),
    GetZoneStatus { zone_id: String },
    GetActiveTasks,
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::CreateTask(_) => ToolKind::CreateTask,
            Self::SendDeviceCommand(_) => ToolKind::SendDeviceCommand,
            Self::Speak(_) => ToolKind::Speak,
            Self::GetZoneStatus { .. } => ToolKind::GetZoneStatus,
            Self::GetActiveTasks => ToolKind::GetActiveTasks,
        }
    }

    /// Parse an LLM tool call into the union.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ToolParseError> {
        let str_arg = |key: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let int_arg = |key: &str| args.get(key).and_then(Value::as_i64);

        match name {
            "create_task" => Ok(Self::CreateTask(CreateTaskArgs {
                title: str_arg("title").ok_or(ToolParseError::MissingArgument {
                    tool: "create_task",
                    arg: "title",
                })?,
                description: str_arg("description").unwrap_or_default(),
                bounty: int_arg("bounty").unwrap_or(1000),
                urgency: int_arg("urgency").unwrap_or(2),
                zone: str_arg("zone").filter(|z| !z.is_empty()),
                task_types_csv: str_arg("task_types").unwrap_or_else(|| "general".to_string()),
            })),
            "send_device_command" => {
                let inner = match args.get("arguments") {
                    Some(Value::String(raw)) => {
                        serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
                    }
                    Some(Value::Object(map)) => Value::Object(map.clone()),
                    _ => json!({}),
                };
                Ok(Self::SendDeviceCommand(DeviceCommandArgs {
                    agent_id: str_arg("agent_id").ok_or(ToolParseError::MissingArgument {
                        tool: "send_device_command",
                        arg: "agent_id",
                    })?,
                    tool_name: str_arg("tool_name").ok_or(ToolParseError::MissingArgument {
                        tool: "send_device_command",
                        arg: "tool_name",
                    })?,
                    arguments: inner,
                }))
            }
            "speak" => Ok(Self::Speak(SpeakArgs {
                message: str_arg("message").unwrap_or_default(),
                zone: str_arg("zone").filter(|z| !z.is_empty()),
                tone: str_arg("tone").unwrap_or_else(|| "neutral".to_string()),
            })),
            "get_zone_status" => Ok(Self::GetZoneStatus {
                zone_id: str_arg("zone_id").ok_or(ToolParseError::MissingArgument {
                    tool: "get_zone_status",
                    arg: "zone_id",
                })?,
            }),
            "get_active_tasks" => Ok(Self::GetActiveTasks),
            other => Err(ToolParseError::UnknownTool(other.to_string())),
        }
    }

    /// Short summary for the action history.
    pub fn summary(&self) -> String {
        match self {
            Self::Speak(args) => format!(
                "zone={}, msg={}",
                args.zone.as_deref().unwrap_or("?"),
                args.message.chars().take(30).collect::<String>()
            ),
            Self::CreateTask(args) => format!("title={}", args.title),
            Self::GetZoneStatus { zone_id } => format!("zone={zone_id}"),
            Self::SendDeviceCommand(args) => {
                format!("{}/{}", args.agent_id, args.tool_name)
            }
            Self::GetActiveTasks => String::new(),
        }
    }
}
