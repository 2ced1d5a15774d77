//! # config
//!
//! Static configuration record, resolved once at boot. Defaults cover the
//! full deployment (anchor frame, race rules, detection thresholds, smoother
//! tuning); a handful of deployment-specific values can be overridden via
//! environment variables in the usual way:
//!
//! - `RACE_UDP_PORT`   — ingress datagram port (default 4210)
//! - `RACE_WS_PORT`    — WebSocket broadcast port (default 8001)
//! - `LAP_API_URL`     — lap persistence endpoint (unset = disabled)
//! - `CORS_ORIGINS`    — comma-separated origins, or `*`
//!
//! The dynamic subset ([`RaceConfig`]) is re-merged from the admin payload at
//! every race arm: any missing or non-positive value falls back to the
//! compile-time default, and reset restores defaults.

use std::collections::HashMap;

use serde::Deserialize;

use crate::track::{LineOrientation, StartLine};

// ── Units ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedUnit {
    KmH,
    Ms,
    CmS,
}

impl SpeedUnit {
    pub fn label(&self) -> &'static str {
        match self {
            SpeedUnit::KmH => "km/h",
            SpeedUnit::Ms => "m/s",
            SpeedUnit::CmS => "cm/s",
        }
    }

    /// Convert a cm/s speed into this display unit.
    pub fn from_cms(&self, cms: f64) -> f64 {
        match self {
            SpeedUnit::KmH => cms * 0.036,
            SpeedUnit::Ms => cms / 100.0,
            SpeedUnit::CmS => cms,
        }
    }
}

// ── Sub-records ───────────────────────────────────────────────────────────────

/// RSSI weighting curve for the positioning solver.
#[derive(Debug, Clone, Copy)]
pub struct RssiConfig {
    pub excellent: f64,
    pub poor: f64,
    pub min_weight: f64,
    pub normalization: f64,
}

/// Generated-oval parameters (anchor-frame cm).
#[derive(Debug, Clone, Copy)]
pub struct TrackConfig {
    pub center: (f64, f64),
    pub outer_radius: (f64, f64),
    pub width: f64,
    pub points: usize,
}

// ── Static configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub udp_port: u16,
    pub ws_port: u16,

    /// Anchor id → fixed planar coordinates, cm.
    pub anchor_positions: HashMap<usize, (f64, f64)>,
    /// Number of range entries consumed per fix.
    pub anchor_count: usize,
    /// Tag ids are 0..tag_count.
    pub tag_count: usize,

    pub total_laps: u32,
    pub min_laps_to_qualify: u32,
    /// Crossing cooldown, seconds.
    pub min_lap_time: f64,
    pub start_line: StartLine,
    pub checkpoints: Vec<(f64, f64)>,
    pub checkpoint_radius: f64,

    pub wall_hit_penalty: f64,
    pub attacker_penalty: f64,
    pub victim_bonus: f64,
    pub corner_cut_penalty: f64,
    pub corner_cut_void_lap: bool,
    pub pit_zone_max_speed_cms: f64,
    pub pit_zone_overspeed_penalty: f64,

    pub car_collision_distance_cm: f64,
    pub car_collision_cooldown: f64,
    pub speed_diff_threshold: f64,
    pub wall_tolerance_cm: f64,
    pub wall_collision_cooldown: f64,
    pub ghosting_speed_threshold: f64,
    pub ghosting_time_threshold: f64,
    pub max_plausible_speed_cms: f64,

    pub kalman_process_noise: f64,
    pub kalman_measurement_noise: f64,
    pub trail_length: usize,
    /// Seconds without a fix before a tag goes inactive.
    pub tag_timeout: f64,
    pub speed_average_samples: usize,
    pub speed_unit: SpeedUnit,

    pub rssi: RssiConfig,
    pub track: TrackConfig,

    pub lap_api_url: Option<String>,
    pub cors_origins: String,
}

impl Default for Config {
    fn default() -> Self {
        let anchor_positions = HashMap::from([
            (0, (0.0, 0.0)),
            (1, (430.0, 0.0)),
            (2, (430.0, 470.0)),
            (3, (0.0, 470.0)),
        ]);
        Self {
            udp_port: 4210,
            ws_port: 8001,
            anchor_positions,
            anchor_count: 4,
            tag_count: 6,
            total_laps: 10,
            min_laps_to_qualify: 3,
            min_lap_time: 3.0,
            start_line: StartLine {
                orientation: LineOrientation::Vertical,
                x: 80.0,
                y1: 85.0,
                y2: 115.0,
                crossing_threshold: 20.0,
            },
            checkpoints: Vec::new(),
            checkpoint_radius: 25.0,
            wall_hit_penalty: 5.0,
            attacker_penalty: 5.0,
            victim_bonus: 2.0,
            corner_cut_penalty: 3.0,
            corner_cut_void_lap: false,
            pit_zone_max_speed_cms: 30.0,
            pit_zone_overspeed_penalty: 2.0,
            car_collision_distance_cm: 25.0,
            car_collision_cooldown: 1.0,
            speed_diff_threshold: 10.0,
            wall_tolerance_cm: 5.0,
            wall_collision_cooldown: 0.5,
            ghosting_speed_threshold: 0.20,
            ghosting_time_threshold: 3.0,
            max_plausible_speed_cms: 278.0,
            kalman_process_noise: 0.1,
            kalman_measurement_noise: 5.0,
            trail_length: 30,
            tag_timeout: 5.0,
            speed_average_samples: 10,
            speed_unit: SpeedUnit::KmH,
            rssi: RssiConfig {
                excellent: -60.0,
                poor: -90.0,
                min_weight: 0.1,
                normalization: 30.0,
            },
            track: TrackConfig {
                center: (215.0, 235.0),
                outer_radius: (160.0, 180.0),
                width: 30.0,
                points: 40,
            },
            lap_api_url: None,
            cors_origins: "http://localhost:3000,http://localhost:5173".to_string(),
        }
    }
}

impl Config {
    /// Resolve the boot configuration: defaults plus env overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.udp_port = std::env::var("RACE_UDP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.udp_port);
        cfg.ws_port = std::env::var("RACE_WS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(cfg.ws_port);
        cfg.lap_api_url = std::env::var("LAP_API_URL").ok().filter(|v| !v.is_empty());
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            cfg.cors_origins = origins;
        }
        cfg
    }
}

// ── Dynamic race configuration ────────────────────────────────────────────────

/// The `race_config` object carried by an `admin_start` payload. The field
/// names follow the tournament API: `object_collision_time` is the wall-hit
/// penalty, `collision_creating_time` the attacker penalty, and
/// `collision_absorbing_time` the victim bonus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaceConfigPayload {
    pub object_collision_time: Option<f64>,
    pub collision_creating_time: Option<f64>,
    pub collision_absorbing_time: Option<f64>,
    pub total_laps: Option<i64>,
}

/// The dynamic subset of the configuration, applied at race arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceConfig {
    pub total_laps: u32,
    pub wall_hit_penalty: f64,
    pub attacker_penalty: f64,
    pub victim_bonus: f64,
}

impl RaceConfig {
    pub fn defaults(cfg: &Config) -> Self {
        Self {
            total_laps: cfg.total_laps,
            wall_hit_penalty: cfg.wall_hit_penalty,
            attacker_penalty: cfg.attacker_penalty,
            victim_bonus: cfg.victim_bonus,
        }
    }

    /// Merge an admin payload over the defaults. A missing or non-positive
    /// value falls back to its default, field by field. The top-level
    /// `total_laps` takes precedence over the one nested in `race_config`.
    pub fn merge(
        cfg: &Config,
        total_laps: Option<i64>,
        payload: Option<&RaceConfigPayload>,
    ) -> Self {
        let mut rc = Self::defaults(cfg);

        let laps = total_laps.or_else(|| payload.and_then(|p| p.total_laps));
        if let Some(n) = laps {
            if n > 0 {
                rc.total_laps = n as u32;
            }
        }
        if let Some(p) = payload {
            rc.wall_hit_penalty = positive_or(p.object_collision_time, rc.wall_hit_penalty);
            rc.attacker_penalty = positive_or(p.collision_creating_time, rc.attacker_penalty);
            rc.victim_bonus = positive_or(p.collision_absorbing_time, rc.victim_bonus);
        }
        rc
    }
}

fn positive_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v > 0.0 => v,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_without_payload_yields_defaults() {
        let cfg = Config::default();
        let rc = RaceConfig::merge(&cfg, None, None);
        assert_eq!(rc, RaceConfig::defaults(&cfg));
    }

    #[test]
    fn merge_applies_positive_values() {
        let cfg = Config::default();
        let payload = RaceConfigPayload {
            object_collision_time: Some(7.0),
            collision_creating_time: Some(6.0),
            collision_absorbing_time: Some(3.0),
            total_laps: None,
        };
        let rc = RaceConfig::merge(&cfg, Some(5), Some(&payload));
        assert_eq!(rc.total_laps, 5);
        assert_eq!(rc.wall_hit_penalty, 7.0);
        assert_eq!(rc.attacker_penalty, 6.0);
        assert_eq!(rc.victim_bonus, 3.0);
    }

    #[test]
    fn merge_rejects_non_positive_values() {
        let cfg = Config::default();
        let payload = RaceConfigPayload {
            object_collision_time: Some(0.0),
            collision_creating_time: Some(-1.0),
            collision_absorbing_time: None,
            total_laps: Some(0),
        };
        let rc = RaceConfig::merge(&cfg, Some(-3), Some(&payload));
        assert_eq!(rc.total_laps, cfg.total_laps);
        assert_eq!(rc.wall_hit_penalty, cfg.wall_hit_penalty);
        assert_eq!(rc.attacker_penalty, cfg.attacker_penalty);
        assert_eq!(rc.victim_bonus, cfg.victim_bonus);
    }

    #[test]
    fn nested_total_laps_used_when_top_level_missing() {
        let cfg = Config::default();
        let payload = RaceConfigPayload {
            total_laps: Some(8),
            ..Default::default()
        };
        let rc = RaceConfig::merge(&cfg, None, Some(&payload));
        assert_eq!(rc.total_laps, 8);
    }

    #[test]
    fn speed_unit_conversions() {
        assert!((SpeedUnit::KmH.from_cms(100.0) - 3.6).abs() < 1e-9);
        assert!((SpeedUnit::Ms.from_cms(100.0) - 1.0).abs() < 1e-9);
        assert_eq!(SpeedUnit::CmS.from_cms(100.0), 100.0);
    }
}
