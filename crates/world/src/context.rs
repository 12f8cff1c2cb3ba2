//! Rendering of the multi-zone summary fed to the LLM.
//!
//! The layout is fixed so the model sees a stable shape every cycle: an
//! alerts section first (only when something is out of range), then one
//! block per zone with occupancy, environment, devices, and recent events.

use std::collections::BTreeMap;

use crate::state::ZoneState;

/// How far back per-zone "recent events" reach (seconds).
const EVENT_WINDOW_SECS: f64 = 600.0;
/// At most this many events are shown per zone.
const EVENTS_SHOWN: usize = 3;

pub(crate) fn render_context(zones: &BTreeMap<String, ZoneState>, now: f64) -> String {
    let mut parts = Vec::new();

    let alerts = render_alerts(zones);
    if !alerts.is_empty() {
        parts.push(alerts);
    }

    for zone in zones.values() {
        parts.push(render_zone(zone, now));
    }

    parts.join("\n")
}

fn render_alerts(zones: &BTreeMap<String, ZoneState>) -> String {
    let mut lines = Vec::new();
    for zone in zones.values() {
        let env = &zone.environment;
        if let Some(t) = env.temperature {
            if !(18.0..=26.0).contains(&t) {
                lines.push(format!(
                    "- [{}] temperature {t:.1}°C outside comfort range 18-26°C",
                    zone.zone_id
                ));
            }
        }
        if let Some(h) = env.humidity {
            if !(30.0..=70.0).contains(&h) {
                lines.push(format!(
                    "- [{}] humidity {h:.0}% outside comfort range 30-70%",
                    zone.zone_id
                ));
            }
        }
        if let Some(ppm) = env.co2 {
            if ppm > 1000 {
                lines.push(format!(
                    "- [{}] CO2 {ppm}ppm exceeds 1000ppm threshold",
                    zone.zone_id
                ));
            }
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    format!("## ALERTS\n{}\n", lines.join("\n"))
}

fn render_zone(zone: &ZoneState, now: f64) -> String {
    let mut summary = format!("### {}\n", zone.zone_id);

    // Occupancy and activity.
    if zone.occupancy.person_count > 0 {
        summary.push_str(&format!("- status: {}\n", zone.occupancy.activity_summary()));
        if zone.occupancy.avg_motion_level > 0.0 {
            summary.push_str(&format!(
                "- motion level: {:.2}\n",
                zone.occupancy.avg_motion_level
            ));
        }
        if zone.occupancy.posture_status != "unknown" {
            let minutes = (zone.occupancy.posture_duration_sec / 60.0) as i64;
            summary.push_str(&format!(
                "- posture: {} ({minutes} min)\n",
                zone.occupancy.posture_status
            ));
        }
    } else {
        summary.push_str("- status: unoccupied\n");
    }

    // Environment.
    let env = &zone.environment;
    if let Some(t) = env.temperature {
        summary.push_str(&format!(
            "- temperature: {t:.1}°C ({})\n",
            env.thermal_comfort()
        ));
    }
    if let Some(h) = env.humidity {
        summary.push_str(&format!("- humidity: {h:.0}%\n"));
    }
    if let Some(ppm) = env.co2 {
        if env.is_stuffy() {
            summary.push_str(&format!("- co2: {ppm}ppm (ventilation needed)\n"));
        } else {
            summary.push_str(&format!("- co2: {ppm}ppm\n"));
        }
    }
    if let Some(lux) = env.illuminance {
        summary.push_str(&format!("- illuminance: {lux:.0}lux\n"));
    }
    if let Some(hpa) = env.pressure {
        summary.push_str(&format!("- pressure: {hpa:.0}hPa\n"));
    }

    // Devices.
    if !zone.devices.is_empty() {
        summary.push_str("- devices:\n");
        let mut ids: Vec<&String> = zone.devices.keys().collect();
        ids.sort();
        for id in ids {
            let device = &zone.devices[id];
            summary.push_str(&format!(
                "  - {} ({id}): {}\n",
                device.device_type, device.power_state
            ));
        }
    }

    // Recent events.
    let recent: Vec<String> = zone
        .events_since(now - EVENT_WINDOW_SECS)
        .map(|e| format!("  - {}", e.description()))
        .collect();
    if !recent.is_empty() {
        summary.push_str("- recent events:\n");
        let start = recent.len().saturating_sub(EVENTS_SHOWN);
        for line in &recent[start..] {
            summary.push_str(line);
            summary.push('\n');
        }
    }

    summary
}
