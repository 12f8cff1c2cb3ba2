//! World model: the unified in-memory state of every office zone.
//!
//! Bus messages flow in via [`WorldModel::update_from_message`]; each update
//! fuses sensor readings, refreshes zone state, runs event detection, and
//! returns the events it generated so the caller can decide whether to wake
//! the cognitive cycle. The model is owned by a single task — it is never
//! mutated from a transport thread.

mod context;
mod fusion;
mod state;

pub use fusion::{Reading, SensorFusion};
pub use state::{
    DeviceState, EnvironmentData, Event, EventSeverity, OccupancyData, ZoneState,
};

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, info};

/// Sliding window kept per (zone, channel) for fusion (seconds).
const READING_WINDOW_SECS: f64 = 600.0;
/// Maximum events retained per zone.
const MAX_EVENTS_PER_ZONE: usize = 50;
/// LLM context cache lifetime (seconds).
const CONTEXT_CACHE_SECS: f64 = 5.0;
/// Assumed zone floor area when none is configured (m²).
const DEFAULT_ZONE_AREA_M2: f64 = 20.0;

/// Current unix time in seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug)]
struct ParsedTopic<'a> {
    zone: &'a str,
    device_type: &'a str,
    device_id: Option<&'a str>,
    channel: Option<&'a str>,
}

/// Maintains the fused state of all zones.
#[derive(Debug)]
pub struct WorldModel {
    zones: BTreeMap<String, ZoneState>,
    fusion: SensorFusion,
    readings: HashMap<(String, String), Vec<Reading>>,
    zone_areas: HashMap<String, f64>,
    context_cache: Option<(String, f64)>,
}

impl Default for WorldModel {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldModel {
    pub fn new() -> Self {
        Self {
            zones: BTreeMap::new(),
            fusion: SensorFusion::default(),
            readings: HashMap::new(),
            zone_areas: HashMap::new(),
            context_cache: None,
        }
    }

    /// Configure the floor area used for occupancy scaling in a zone.
    pub fn set_zone_area(&mut self, zone: impl Into<String>, area_m2: f64) {
        self.zone_areas.insert(zone.into(), area_m2);
    }

    /// Configure the reliability score for a specific sensor.
    pub fn set_sensor_reliability(&mut self, sensor_id: impl Into<String>, score: f64) {
        self.fusion.set_reliability(sensor_id, score);
    }

    pub fn get_zone(&self, zone_id: &str) -> Option<&ZoneState> {
        self.zones.get(zone_id)
    }

    pub fn zones(&self) -> &BTreeMap<String, ZoneState> {
        &self.zones
    }

    /// Apply a bus message. Returns the events this update generated
    /// (possibly empty). Non-matching topics are ignored.
    pub fn update_from_message(&mut self, topic: &str, payload: &Value) -> Vec<Event> {
        self.update_at(topic, payload, unix_now())
    }

    /// [`Self::update_from_message`] with an explicit clock, for tests and
    /// replay.
    pub fn update_at(&mut self, topic: &str, payload: &Value, now: f64) -> Vec<Event> {
        let Some(parsed) = Self::parse_topic(topic) else {
            debug!(topic, "ignoring non-office topic");
            return Vec::new();
        };

        let zone_id = parsed.zone.to_string();
        if !self.zones.contains_key(&zone_id) {
            self.zones
                .insert(zone_id.clone(), ZoneState::new(&zone_id, now));
            info!(zone = %zone_id, "created new zone");
        }
        let zone_area = self
            .zone_areas
            .get(&zone_id)
            .copied()
            .unwrap_or(DEFAULT_ZONE_AREA_M2);

        // task_report is not a device class; it carries its own event.
        if parsed.device_type == "task_report" {
            let zone = self.zones.get_mut(&zone_id).unwrap();
            let event = Self::task_report_event(payload, now);
            zone.events.push(event.clone());
            Self::trim_events(zone);
            zone.last_update = now;
            self.context_cache = None;
            return vec![event];
        }

        match parsed.device_type {
            "sensor" => {
                if let (Some(channel), Some(device_id)) = (parsed.channel, parsed.device_id) {
                    self.update_environment(&zone_id, channel, device_id, payload, zone_area, now);
                }
            }
            "camera" => self.update_occupancy(&zone_id, payload, zone_area),
            "activity" => self.update_activity(&zone_id, payload, zone_area),
            device_type => {
                if let Some(device_id) = parsed.device_id {
                    self.update_device(&zone_id, device_type, device_id, payload);
                }
            }
        }

        let zone = self.zones.get_mut(&zone_id).unwrap();
        zone.last_update = now;
        let new_events = Self::detect_events(zone, now);
        self.context_cache = None;
        new_events
    }

    /// Multi-zone summary for the LLM, cached for a few seconds.
    pub fn llm_context(&mut self) -> String {
        self.llm_context_at(unix_now())
    }

    pub fn llm_context_at(&mut self, now: f64) -> String {
        if let Some((cached, stamp)) = &self.context_cache {
            if now - stamp < CONTEXT_CACHE_SECS {
                return cached.clone();
            }
        }
        let rendered = context::render_context(&self.zones, now);
        self.context_cache = Some((rendered.clone(), now));
        rendered
    }

    /// All events across zones newer than `window_secs`, as
    /// (zone_id, event) pairs in zone order.
    pub fn recent_events(&self, window_secs: f64, now: f64) -> Vec<(String, Event)> {
        let cutoff = now - window_secs;
        let mut out = Vec::new();
        for (zone_id, zone) in &self.zones {
            for event in zone.events_since(cutoff) {
                out.push((zone_id.clone(), event.clone()));
            }
        }
        out
    }

    // ── topic parsing ────────────────────────────────────────────────────────

    /// `office/{zone}/{device_type}/{device_id}[/{channel}]`
    fn parse_topic(topic: &str) -> Option<ParsedTopic<'_>> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 || parts[0] != "office" {
            return None;
        }
        Some(ParsedTopic {
            zone: parts[1],
            device_type: parts[2],
            device_id: parts.get(3).copied(),
            channel: parts.get(4).copied(),
        })
    }

    // ── per-device-type handlers ─────────────────────────────────────────────

    fn update_environment(
        &mut self,
        zone_id: &str,
        channel: &str,
        device_id: &str,
        payload: &Value,
        zone_area: f64,
        now: f64,
    ) {
        let value = payload
            .get(channel)
            .or_else(|| payload.get("value"))
            .and_then(value_as_f64);
        let Some(value) = value else { return };

        // PIR is a boolean presence channel, not a fused magnitude.
        if channel == "pir" {
            let zone = self.zones.get_mut(zone_id).unwrap();
            zone.occupancy.pir_detected = value != 0.0;
            zone.occupancy.person_count = SensorFusion::integrate_occupancy(
                zone.occupancy.vision_count,
                zone.occupancy.pir_detected,
                zone_area,
            );
            return;
        }

        let key = (zone_id.to_string(), channel.to_string());
        let buffer = self.readings.entry(key).or_default();
        buffer.push((device_id.to_string(), value, now));
        buffer.retain(|(_, _, ts)| now - ts < READING_WINDOW_SECS);

        let Some(fused) = self.fusion.fuse(buffer, channel, now) else {
            return;
        };

        let zone = self.zones.get_mut(zone_id).unwrap();
        match channel {
            "temperature" => zone.environment.temperature = Some(fused),
            "humidity" => zone.environment.humidity = Some(fused),
            "co2" => zone.environment.co2 = Some(fused as i64),
            "illuminance" => zone.environment.illuminance = Some(fused),
            "pressure" => zone.environment.pressure = Some(fused),
            "gas_resistance" => zone.environment.gas_resistance = Some(fused as i64),
            _ => return,
        }
        zone.environment.timestamps.insert(channel.to_string(), now);
    }

    fn update_occupancy(&mut self, zone_id: &str, payload: &Value, zone_area: f64) {
        let zone = self.zones.get_mut(zone_id).unwrap();
        if let Some(count) = payload.get("person_count").and_then(Value::as_u64) {
            zone.occupancy.vision_count = count as u32;
        } else if let Some(occupied) = payload.get("occupancy").and_then(Value::as_bool) {
            zone.occupancy.vision_count = occupied as u32;
        }
        if let Some(dist) = payload.get("activity_distribution").and_then(Value::as_object) {
            zone.occupancy.activity_distribution = dist
                .iter()
                .filter_map(|(k, v)| v.as_u64().map(|n| (k.clone(), n as u32)))
                .collect();
        }
        if let Some(level) = payload.get("avg_motion_level").and_then(Value::as_f64) {
            zone.occupancy.avg_motion_level = level;
        }
        zone.occupancy.person_count = SensorFusion::integrate_occupancy(
            zone.occupancy.vision_count,
            zone.occupancy.pir_detected,
            zone_area,
        );
    }

    fn update_activity(&mut self, zone_id: &str, payload: &Value, zone_area: f64) {
        let zone = self.zones.get_mut(zone_id).unwrap();
        if let Some(count) = payload.get("person_count").and_then(Value::as_u64) {
            zone.occupancy.vision_count = count as u32;
            zone.occupancy.person_count = SensorFusion::integrate_occupancy(
                count as u32,
                zone.occupancy.pir_detected,
                zone_area,
            );
        }
        if let Some(level) = payload.get("activity_level").and_then(Value::as_f64) {
            zone.occupancy.activity_level = level;
        }
        if let Some(class) = payload.get("activity_class").and_then(Value::as_str) {
            zone.occupancy.activity_class = class.to_string();
        }
        if let Some(duration) = payload.get("posture_duration_sec").and_then(Value::as_f64) {
            zone.occupancy.posture_duration_sec = duration;
        }
        if let Some(status) = payload.get("posture_status").and_then(Value::as_str) {
            zone.occupancy.posture_status = status.to_string();
        }
    }

    fn update_device(&mut self, zone_id: &str, device_type: &str, device_id: &str, payload: &Value) {
        let zone = self.zones.get_mut(zone_id).unwrap();
        let device = zone
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceState::new(device_id, device_type));

        if let Some(state) = payload
            .get("power_state")
            .or_else(|| payload.get("state"))
            .and_then(Value::as_str)
        {
            device.power_state = state.to_string();
        }
        if payload.get("mode").is_some() || payload.get("target_temp").is_some() {
            if let Some(object) = payload.as_object() {
                for (k, v) in object {
                    device.specific_state.insert(k.clone(), v.clone());
                }
            }
        }
    }

    fn task_report_event(payload: &Value, now: f64) -> Event {
        let status = payload
            .get("report_status")
            .and_then(Value::as_str)
            .unwrap_or("");
        let severity = match status {
            "needs_followup" | "cannot_resolve" => EventSeverity::Warning,
            _ => EventSeverity::Info,
        };
        Event::new(now, "task_report", severity, payload.clone())
    }

    // ── event detection ──────────────────────────────────────────────────────

    fn detect_events(zone: &mut ZoneState, now: f64) -> Vec<Event> {
        let mut new_events = Vec::new();

        // Previous env values must be captured before they are rolled below.
        let saved_prev_temperature = zone.tracker.prev_temperature;
        let saved_prev_humidity = zone.tracker.prev_humidity;

        // Person count change.
        let count = zone.occupancy.person_count;
        if count != zone.tracker.prev_occupancy {
            if count > zone.tracker.prev_occupancy {
                new_events.push(Event::new(
                    now,
                    "person_entered",
                    EventSeverity::Info,
                    serde_json::json!({"count": count}),
                ));
                zone.occupancy.last_entry_time = Some(now);
            } else {
                new_events.push(Event::new(
                    now,
                    "person_exited",
                    EventSeverity::Info,
                    serde_json::json!({"count": count}),
                ));
                if count == 0 {
                    zone.occupancy.last_exit_time = Some(now);
                }
            }
            zone.tracker.prev_occupancy = count;
        }

        // CO2 threshold with 10-minute dedup cooldown.
        if let Some(ppm) = zone.environment.co2 {
            if ppm > 1000 && !Self::recent_event(zone, "co2_threshold_exceeded", 600.0, now) {
                new_events.push(Event::new(
                    now,
                    "co2_threshold_exceeded",
                    EventSeverity::Warning,
                    serde_json::json!({"value": ppm}),
                ));
            }
        }

        // Temperature spike vs previous fused value.
        if let (Some(current), Some(previous)) =
            (zone.environment.temperature, zone.tracker.prev_temperature)
        {
            let change = current - previous;
            if change.abs() > 3.0 {
                new_events.push(Event::new(
                    now,
                    "temp_spike",
                    EventSeverity::Warning,
                    serde_json::json!({"value": current, "change": change}),
                ));
            }
        }
        zone.tracker.prev_temperature = zone.environment.temperature;

        // Sedentary: static posture >= 30 min with people present, 1h cooldown.
        if zone.occupancy.person_count > 0
            && zone.occupancy.posture_status == "static"
            && zone.occupancy.posture_duration_sec >= 1800.0
            && !Self::recent_event(zone, "sedentary_alert", 3600.0, now)
        {
            new_events.push(Event::new(
                now,
                "sedentary_alert",
                EventSeverity::Info,
                serde_json::json!({
                    "duration_sec": zone.occupancy.posture_duration_sec,
                    "person_count": zone.occupancy.person_count,
                }),
            ));
        }

        // Sensor tamper: implausibly fast environment change.
        let tamper_channels: [(&str, Option<f64>, f64); 2] = [
            ("temperature", saved_prev_temperature, 5.0),
            ("humidity", saved_prev_humidity, 20.0),
        ];
        for (channel, prev_value, threshold) in tamper_channels {
            let current_value = match channel {
                "temperature" => zone.environment.temperature,
                _ => zone.environment.humidity,
            };
            let current_ts = zone.environment.timestamps.get(channel).copied();
            let prev_ts = zone.tracker.prev_env_timestamps.get(channel).copied();

            if let (Some(current), Some(previous), Some(cur_ts), Some(old_ts)) =
                (current_value, prev_value, current_ts, prev_ts)
            {
                let dt = cur_ts - old_ts;
                let change = (current - previous).abs();
                if dt > 0.0
                    && dt <= 30.0
                    && change >= threshold
                    && !Self::recent_event(zone, "sensor_tamper", 300.0, now)
                {
                    new_events.push(Event::new(
                        now,
                        "sensor_tamper",
                        EventSeverity::Warning,
                        serde_json::json!({
                            "channel": channel,
                            "change": change,
                            "duration_sec": dt,
                            "value": current,
                        }),
                    ));
                }
            }

            if channel == "humidity" {
                if let Some(current) = current_value {
                    zone.tracker.prev_humidity = Some(current);
                }
            }
            if let Some(ts) = current_ts {
                zone.tracker.prev_env_timestamps.insert(channel.to_string(), ts);
            }
        }

        zone.events.extend(new_events.iter().cloned());
        Self::trim_events(zone);
        new_events
    }

    fn recent_event(zone: &ZoneState, event_type: &str, window: f64, now: f64) -> bool {
        zone.events
            .iter()
            .any(|e| e.event_type == event_type && now - e.timestamp < window)
    }

    fn trim_events(zone: &mut ZoneState) {
        if zone.events.len() > MAX_EVENTS_PER_ZONE {
            let excess = zone.events.len() - MAX_EVENTS_PER_ZONE;
            zone.events.drain(..excess);
        }
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(*b as u8 as f64),
        _ => None,
    }
}
