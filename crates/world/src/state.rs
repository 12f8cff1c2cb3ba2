//! Zone state containers: environment, occupancy, devices, and events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environmental sensor data for a zone. Values are fused readings; each
/// channel carries its own last-update timestamp (unix seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentData {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub co2: Option<i64>,
    pub illuminance: Option<f64>,
    pub pressure: Option<f64>,
    pub gas_resistance: Option<i64>,
    pub timestamps: HashMap<String, f64>,
}

impl EnvironmentData {
    /// CO2 concentration exceeds the 1000 ppm ventilation threshold.
    pub fn is_stuffy(&self) -> bool {
        self.co2.is_some_and(|ppm| ppm > 1000)
    }

    /// Thermal comfort label: cold < 18 °C, hot > 26 °C, comfortable between.
    pub fn thermal_comfort(&self) -> &'static str {
        match self.temperature {
            None => "unknown",
            Some(t) if t < 18.0 => "cold",
            Some(t) if t > 26.0 => "hot",
            Some(_) => "comfortable",
        }
    }
}

/// Occupancy state including activity classification from the perception
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyData {
    pub person_count: u32,
    /// Raw camera detection count.
    pub vision_count: u32,
    pub pir_detected: bool,
    /// Activity-tag → person count (e.g. {"active": 1, "focused": 2}).
    pub activity_distribution: HashMap<String, u32>,
    pub avg_motion_level: f64,
    pub activity_level: f64,
    /// "idle" | "low" | "moderate" | "high".
    pub activity_class: String,
    pub posture_duration_sec: f64,
    /// "changing" | "mostly_static" | "static".
    pub posture_status: String,
    pub last_entry_time: Option<f64>,
    pub last_exit_time: Option<f64>,
}

impl Default for OccupancyData {
    fn default() -> Self {
        Self {
            person_count: 0,
            vision_count: 0,
            pir_detected: false,
            activity_distribution: HashMap::new(),
            avg_motion_level: 0.0,
            activity_level: 0.0,
            activity_class: "unknown".to_string(),
            posture_duration_sec: 0.0,
            posture_status: "unknown".to_string(),
            last_entry_time: None,
            last_exit_time: None,
        }
    }
}

impl OccupancyData {
    pub fn is_occupied(&self) -> bool {
        self.person_count > 0
    }

    /// Most common activity tag, or "unknown" when nothing is classified.
    pub fn dominant_activity(&self) -> &str {
        self.activity_distribution
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(tag, _)| tag.as_str())
            .unwrap_or("unknown")
    }

    /// One-line summary for LLM context.
    pub fn activity_summary(&self) -> String {
        if self.person_count == 0 {
            return "unoccupied".to_string();
        }
        let active = self.activity_distribution.get("active").copied().unwrap_or(0);
        let focused = self.activity_distribution.get("focused").copied().unwrap_or(0);
        if active > focused {
            format!("{} people actively moving", self.person_count)
        } else {
            format!("{} people in focused work", self.person_count)
        }
    }
}

/// State of a controllable device (hvac, light, coffee_machine, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub device_type: String,
    pub is_online: bool,
    /// "on" | "off" | "standby".
    pub power_state: String,
    /// Device-specific fields (e.g. {"mode": "cooling", "target_temp": 24}).
    pub specific_state: serde_json::Map<String, Value>,
    pub last_command: Option<String>,
    pub last_command_time: Option<f64>,
}

impl DeviceState {
    pub fn new(device_id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            is_online: true,
            power_state: "off".to_string(),
            specific_state: serde_json::Map::new(),
            last_command: None,
            last_command_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Event record for zone history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64,
    pub event_type: String,
    pub severity: EventSeverity,
    pub data: Value,
}

impl Event {
    pub fn new(
        timestamp: f64,
        event_type: impl Into<String>,
        severity: EventSeverity,
        data: Value,
    ) -> Self {
        Self {
            timestamp,
            event_type: event_type.into(),
            severity,
            data,
        }
    }

    /// Deterministic human-readable description for LLM consumption.
    pub fn description(&self) -> String {
        let get_i64 = |key: &str| self.data.get(key).and_then(Value::as_i64).unwrap_or(0);
        let get_f64 = |key: &str| self.data.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let get_str = |key: &str| {
            self.data
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };

        match self.event_type.as_str() {
            "person_entered" => format!("{} person(s) entered the zone", get_i64("count")),
            "person_exited" => format!("{} person(s) remain after someone left", get_i64("count")),
            "co2_threshold_exceeded" => format!(
                "CO2 reached {}ppm (ventilation recommended)",
                get_i64("value")
            ),
            "temp_spike" => format!(
                "Temperature changed sharply to {:.1}°C ({:+.1}°C)",
                get_f64("value"),
                get_f64("change")
            ),
            "sedentary_alert" => format!(
                "{} person(s) sitting in the same posture for over {} minutes",
                get_i64("person_count"),
                (get_f64("duration_sec") / 60.0) as i64
            ),
            "sensor_tamper" => format!(
                "Sensor anomaly: {} jumped by {:.1} within {:.0}s",
                get_str("channel"),
                get_f64("change"),
                get_f64("duration_sec")
            ),
            "task_report" => {
                let status = match get_str("report_status").as_str() {
                    "no_issue" => "no issue found",
                    "resolved" => "resolved",
                    "needs_followup" => "needs follow-up",
                    "cannot_resolve" => "could not be resolved",
                    other => return format!("Task report: \"{}\" -> {other}", get_str("title")),
                };
                let note = get_str("completion_note");
                if note.is_empty() {
                    format!("Task report: \"{}\" -> {status}", get_str("title"))
                } else {
                    format!("Task report: \"{}\" -> {status}: {note}", get_str("title"))
                }
            }
            other => format!("Event: {other}"),
        }
    }
}

/// Change-detection state kept per zone, never exposed to consumers.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeTracker {
    pub prev_occupancy: u32,
    pub prev_temperature: Option<f64>,
    pub prev_humidity: Option<f64>,
    pub prev_env_timestamps: HashMap<String, f64>,
}

/// Complete state of a zone (room/area).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneState {
    pub zone_id: String,
    pub environment: EnvironmentData,
    pub occupancy: OccupancyData,
    pub devices: HashMap<String, DeviceState>,
    /// Bounded event history (most recent last).
    pub events: Vec<Event>,
    pub last_update: f64,
    #[serde(skip)]
    pub(crate) tracker: ChangeTracker,
}

impl ZoneState {
    pub fn new(zone_id: impl Into<String>, now: f64) -> Self {
        Self {
            zone_id: zone_id.into(),
            environment: EnvironmentData::default(),
            occupancy: OccupancyData::default(),
            devices: HashMap::new(),
            events: Vec::new(),
            last_update: now,
            tracker: ChangeTracker::default(),
        }
    }

    /// Events newer than `cutoff` (unix seconds).
    pub fn events_since(&self, cutoff: f64) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.timestamp >= cutoff)
    }
}
