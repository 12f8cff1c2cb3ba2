//! Device RPC over the bus, JSON-RPC 2.0 shaped.
//!
//! Requests go out on `mcp/{agent_id}/request/call_tool`; the device
//! answers on `mcp/{agent_id}/response/{id}`. A background listener task
//! resolves pending calls by request id — the `id` field in the payload is
//! authoritative, the topic segment a fallback. Callers are woken through a
//! oneshot, never on the transport's own thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use soms_bus::Bus;

/// How long a device gets to answer.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum McpError {
    #[error("tool execution timed out: {tool} on {agent}")]
    Timeout { agent: String, tool: String },
    #[error("device error: {0}")]
    Device(String),
    #[error("bridge listener is gone")]
    ListenerGone,
    #[error(transparent)]
    Bus(#[from] soms_bus::BusError),
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Clone)]
pub struct McpBridge {
    bus: Bus,
    pending: PendingMap,
}

impl McpBridge {
    /// Create the bridge and start its response listener task.
    pub fn start(bus: Bus) -> Result<Self, McpError> {
        let bridge = Self {
            bus: bus.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        let mut subscription = bus.subscribe("mcp/+/response/#")?;
        let pending = bridge.pending.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                Self::handle_response(&pending, &message.topic, &message.payload);
            }
            debug!("mcp response listener stopped");
        });

        Ok(bridge)
    }

    /// Call `tool_name` on a device agent and await its response.
    pub async fn call_tool(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        self.call_tool_with_timeout(agent_id, tool_name, arguments, RPC_TIMEOUT)
            .await
    }

    pub async fn call_tool_with_timeout(
        &self,
        agent_id: &str,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let request_id = Uuid::new_v4().to_string();
        let topic = format!("mcp/{agent_id}/request/call_tool");
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call_tool",
            "params": {"name": tool_name, "arguments": arguments},
            "id": request_id,
        });

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        self.bus.publish(&topic, payload);
        debug!(agent = agent_id, tool = tool_name, id = %request_id, "mcp request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(McpError::Device(error)),
            Ok(Err(_)) => Err(McpError::ListenerGone),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                Err(McpError::Timeout {
                    agent: agent_id.to_string(),
                    tool: tool_name.to_string(),
                })
            }
        }
    }

    fn handle_response(pending: &PendingMap, topic: &str, payload: &Value) {
        // Topic: mcp/{agent_id}/response/{request_id}
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 4 {
            return;
        }
        let request_id = payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(parts[3]);

        let sender = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        let Some(sender) = sender else {
            warn!(request_id, "mcp response with no pending request");
            return;
        };

        let outcome = match payload.get("error") {
            Some(error) => Err(error.to_string()),
            None => Ok(payload.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }
}
