//! # tag
//!
//! Per-tag runtime state: the smoothed position, a bounded trail of recent
//! fixes, the rolling speed window and the activity timeout. Mutated only by
//! the ingress pipeline; reset on race reset.

use std::collections::VecDeque;

use crate::config::{Config, SpeedUnit};
use crate::kalman::KalmanFilter;
use crate::positioning::Quality;

#[derive(Debug, Clone, Copy)]
pub struct TagParams {
    pub trail_length: usize,
    pub speed_samples: usize,
    pub timeout: f64,
    pub speed_unit: SpeedUnit,
}

impl TagParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            trail_length: cfg.trail_length,
            speed_samples: cfg.speed_average_samples,
            timeout: cfg.tag_timeout,
            speed_unit: cfg.speed_unit,
        }
    }
}

#[derive(Debug)]
pub struct Tag {
    pub id: usize,
    pub name: String,
    /// Smoothed position.
    pub x: f64,
    pub y: f64,
    /// Last raw (pre-smoothing) solver output.
    pub raw_x: f64,
    pub raw_y: f64,
    pub quality: Quality,
    pub anchor_count: usize,
    pub has_fix: bool,
    pub last_update: f64,
    pub speed_cms: f64,
    pub max_speed_cms: f64,
    pub update_count: u64,
    kalman: KalmanFilter,
    trail: VecDeque<(f64, f64, f64)>,
    speed_buf: VecDeque<(f64, f64, f64)>,
    params: TagParams,
}

impl Tag {
    pub fn new(id: usize, cfg: &Config) -> Self {
        Self {
            id,
            name: format!("Car{id}"),
            x: 0.0,
            y: 0.0,
            raw_x: 0.0,
            raw_y: 0.0,
            quality: Quality::Poor,
            anchor_count: 0,
            has_fix: false,
            last_update: 0.0,
            speed_cms: 0.0,
            max_speed_cms: 0.0,
            update_count: 0,
            kalman: KalmanFilter::new(cfg.kalman_process_noise, cfg.kalman_measurement_noise),
            trail: VecDeque::new(),
            speed_buf: VecDeque::new(),
            params: TagParams::from_config(cfg),
        }
    }

    /// Ingest one solved fix at `now`.
    pub fn update_position(
        &mut self,
        raw_x: f64,
        raw_y: f64,
        quality: Quality,
        anchor_count: usize,
        now: f64,
    ) {
        let dt = if self.last_update > 0.0 {
            (now - self.last_update).clamp(0.001, 1.0)
        } else {
            0.033
        };

        self.raw_x = raw_x;
        self.raw_y = raw_y;
        let (x, y) = self.kalman.update(raw_x, raw_y, dt);
        self.x = x;
        self.y = y;
        self.quality = quality;
        self.anchor_count = anchor_count;
        self.has_fix = true;
        self.last_update = now;
        self.update_count += 1;

        self.trail.push_back((x, y, now));
        while self.trail.len() > self.params.trail_length {
            self.trail.pop_front();
        }

        self.speed_buf.push_back((x, y, now));
        while self.speed_buf.len() > self.params.speed_samples {
            self.speed_buf.pop_front();
        }
        if self.speed_buf.len() >= 2 {
            let (x1, y1, t1) = self.speed_buf[self.speed_buf.len() - 2];
            let (x2, y2, t2) = self.speed_buf[self.speed_buf.len() - 1];
            let ddt = t2 - t1;
            if ddt > 0.0 {
                self.speed_cms = (x2 - x1).hypot(y2 - y1) / ddt;
                self.max_speed_cms = self.max_speed_cms.max(self.speed_cms);
            }
        }
    }

    /// Speed converted to the configured display unit.
    pub fn speed_display(&self) -> f64 {
        self.params.speed_unit.from_cms(self.speed_cms)
    }

    pub fn speed_unit_label(&self) -> &'static str {
        self.params.speed_unit.label()
    }

    pub fn is_active(&self, now: f64) -> bool {
        self.has_fix && (now - self.last_update) < self.params.timeout
    }

    pub fn trail(&self) -> impl Iterator<Item = &(f64, f64, f64)> {
        self.trail.iter()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub fn reset(&mut self) {
        self.kalman.reset();
        self.trail.clear();
        self.speed_buf.clear();
        self.speed_cms = 0.0;
        self.max_speed_cms = 0.0;
        self.has_fix = false;
        self.update_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag() -> Tag {
        Tag::new(0, &Config::default())
    }

    #[test]
    fn trail_is_bounded() {
        let mut t = tag();
        for i in 0..100 {
            t.update_position(i as f64, 0.0, Quality::Good, 3, 1000.0 + i as f64 * 0.1);
        }
        assert_eq!(t.trail_len(), Config::default().trail_length);
        // Oldest samples evicted: first retained entry is recent
        let first = t.trail().next().copied().unwrap_or_default();
        assert!(first.2 > 1000.0 + 6.0);
    }

    #[test]
    fn speed_from_last_two_samples() {
        let mut t = tag();
        t.update_position(0.0, 0.0, Quality::Good, 3, 1000.0);
        t.update_position(100.0, 0.0, Quality::Good, 3, 1001.0);
        // The smoother damps the step; speed equals the filtered delta over 1 s
        let expect = t.x / 1.0;
        assert!((t.speed_cms - expect).abs() < 1e-9);
        assert!(t.max_speed_cms >= t.speed_cms);
    }

    #[test]
    fn activity_times_out() {
        let mut t = tag();
        assert!(!t.is_active(1000.0));
        t.update_position(10.0, 10.0, Quality::Fair, 2, 1000.0);
        assert!(t.is_active(1004.9));
        assert!(!t.is_active(1005.0));
    }

    #[test]
    fn reset_clears_runtime_state() {
        let mut t = tag();
        t.update_position(10.0, 10.0, Quality::Good, 3, 1000.0);
        t.update_position(20.0, 10.0, Quality::Good, 3, 1000.1);
        t.reset();
        assert!(!t.is_active(1000.2));
        assert_eq!(t.trail_len(), 0);
        assert_eq!(t.speed_cms, 0.0);
        assert_eq!(t.update_count, 0);
    }
}
