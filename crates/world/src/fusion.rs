//! Sensor fusion: combine overlapping readings with reliability weighting
//! and exponential age decay.

use std::collections::HashMap;

/// A single buffered reading: (sensor id, value, unix timestamp).
pub type Reading = (String, f64, f64);

/// Combines multiple sensor readings for the same (zone, channel) pair.
///
/// Weight = reliability × exp(−age / half_life). Half-lives are tuned per
/// channel: fast-moving channels (co2, occupancy, pir) decay quickly so the
/// fused value tracks the newest sensor.
#[derive(Debug, Clone)]
pub struct SensorFusion {
    reliability: HashMap<String, f64>,
    default_reliability: f64,
}

impl Default for SensorFusion {
    fn default() -> Self {
        Self {
            reliability: HashMap::new(),
            default_reliability: 0.5,
        }
    }
}

impl SensorFusion {
    /// Half-life in seconds for a channel's age decay.
    pub fn half_life(channel: &str) -> f64 {
        match channel {
            "temperature" | "humidity" | "illuminance" => 120.0,
            "co2" => 60.0,
            "occupancy" => 30.0,
            "pir" => 10.0,
            _ => 120.0,
        }
    }

    /// Set the reliability score for a specific sensor. Scores outside
    /// [0, 1] are clamped.
    pub fn set_reliability(&mut self, sensor_id: impl Into<String>, score: f64) {
        self.reliability
            .insert(sensor_id.into(), score.clamp(0.0, 1.0));
    }

    fn reliability_of(&self, sensor_id: &str) -> f64 {
        self.reliability
            .get(sensor_id)
            .copied()
            .unwrap_or(self.default_reliability)
    }

    /// Weighted average over `readings` at time `now`. Returns `None` when
    /// there is nothing to fuse or every weight decayed to zero.
    pub fn fuse(&self, readings: &[Reading], channel: &str, now: f64) -> Option<f64> {
        if readings.is_empty() {
            return None;
        }
        let half_life = Self::half_life(channel);

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (sensor_id, value, timestamp) in readings {
            let age = (now - timestamp).max(0.0);
            let age_factor = (-age / half_life).exp();
            let weight = self.reliability_of(sensor_id) * age_factor;
            weighted_sum += value * weight;
            total_weight += weight;
        }

        if total_weight == 0.0 {
            return None;
        }
        Some(weighted_sum / total_weight)
    }

    /// Integrate camera vision counts with the PIR sensor.
    ///
    /// PIR motion with zero vision detections means someone is in a camera
    /// blind spot. Large zones (> 50 m²) scale vision counts up 20% to
    /// compensate for limited field of view.
    pub fn integrate_occupancy(vision_count: u32, pir_active: bool, zone_area_m2: f64) -> u32 {
        let mut estimated = vision_count;
        if pir_active && vision_count == 0 {
            estimated = 1;
        }
        if zone_area_m2 > 50.0 && vision_count > 0 {
            estimated = (vision_count as f64 * 1.2) as u32;
        }
        estimated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reading_passes_through() {
        let fusion = SensorFusion::default();
        let readings = vec![("t1".to_string(), 22.5, 100.0)];
        let fused = fusion.fuse(&readings, "temperature", 100.0).unwrap();
        assert!((fused - 22.5).abs() < 1e-9);
    }

    #[test]
    fn newer_reading_dominates() {
        let fusion = SensorFusion::default();
        // Old reading is 10 half-lives stale; its weight is negligible.
        let readings = vec![
            ("t1".to_string(), 30.0, 0.0),
            ("t2".to_string(), 20.0, 1200.0),
        ];
        let fused = fusion.fuse(&readings, "temperature", 1200.0).unwrap();
        assert!((fused - 20.0).abs() < 0.1);
    }

    #[test]
    fn reliability_biases_the_average() {
        let mut fusion = SensorFusion::default();
        fusion.set_reliability("good", 1.0);
        fusion.set_reliability("bad", 0.1);
        let readings = vec![
            ("good".to_string(), 20.0, 100.0),
            ("bad".to_string(), 30.0, 100.0),
        ];
        let fused = fusion.fuse(&readings, "temperature", 100.0).unwrap();
        // (20*1.0 + 30*0.1) / 1.1 ≈ 20.9
        assert!(fused < 21.0);
    }

    #[test]
    fn empty_readings_fuse_to_none() {
        let fusion = SensorFusion::default();
        assert!(fusion.fuse(&[], "co2", 0.0).is_none());
    }

    #[test]
    fn pir_fills_camera_blind_spot() {
        assert_eq!(SensorFusion::integrate_occupancy(0, true, 20.0), 1);
        assert_eq!(SensorFusion::integrate_occupancy(0, false, 20.0), 0);
        assert_eq!(SensorFusion::integrate_occupancy(3, true, 20.0), 3);
    }

    #[test]
    fn large_zone_scales_vision_count() {
        assert_eq!(SensorFusion::integrate_occupancy(5, false, 60.0), 6);
        // No people seen -> no scaling.
        assert_eq!(SensorFusion::integrate_occupancy(0, false, 60.0), 0);
    }
}
