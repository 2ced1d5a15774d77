//! # lap
//!
//! Per-tag start-line crossing state machine: Idle → Armed → Racing →
//! Finished. A crossing is a side change of the filtered position inside the
//! line's band, debounced by the minimum lap time. While racing, checkpoint
//! passage and the lap-1 pit-zone speed limit are evaluated every frame.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::Config;
use crate::events::GameEvent;
use crate::scoring::{LapScore, ScoringEngine};
use crate::track::StartLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapPhase {
    Idle,
    Armed,
    Racing,
    Finished,
}

/// Static crossing rules shared by every engine.
#[derive(Debug, Clone)]
pub struct LapRules {
    pub line: StartLine,
    pub min_lap_time: f64,
    pub checkpoints: Vec<(f64, f64)>,
    pub checkpoint_radius: f64,
    pub pit_zone_max_speed_cms: f64,
}

impl LapRules {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            line: cfg.start_line,
            min_lap_time: cfg.min_lap_time,
            checkpoints: cfg.checkpoints.clone(),
            checkpoint_radius: cfg.checkpoint_radius,
            pit_zone_max_speed_cms: cfg.pit_zone_max_speed_cms,
        }
    }
}

/// One frame's outcome: the event to broadcast plus, when a lap closed, the
/// closed score for the persistence sink.
#[derive(Debug, Clone)]
pub struct LapOutcome {
    pub event: GameEvent,
    pub closed: Option<LapScore>,
}

/// Per-tag snapshot used in `state_update` messages and admin queries.
#[derive(Debug, Clone, Serialize)]
pub struct LapInfo {
    pub tag_id: usize,
    pub name: String,
    pub current_lap: u32,
    pub total_laps: u32,
    pub laps_done: u32,
    pub is_racing: bool,
    pub race_finished: bool,
    pub current_lap_elapsed: f64,
    pub best_raw: f64,
    pub lap_times: Vec<f64>,
}

#[derive(Debug)]
pub struct LapEngine {
    tag_id: usize,
    name: String,
    rules: LapRules,
    pub phase: LapPhase,
    pub current_lap: u32,
    /// Closed laps, voided or not; drives the finish condition.
    pub laps_done: u32,
    total_laps: u32,
    side: Option<bool>,
    lap_start: Option<f64>,
    last_cross: f64,
    checkpoints_hit: HashSet<usize>,
    lap_times: Vec<f64>,
}

impl LapEngine {
    pub fn new(tag_id: usize, name: &str, rules: LapRules, total_laps: u32) -> Self {
        Self {
            tag_id,
            name: name.to_string(),
            rules,
            phase: LapPhase::Idle,
            current_lap: 0,
            laps_done: 0,
            total_laps,
            side: None,
            lap_start: None,
            last_cross: 0.0,
            checkpoints_hit: HashSet::new(),
            lap_times: Vec::new(),
        }
    }

    /// Admin start: enable lap activation on the next crossing.
    pub fn arm(&mut self, total_laps: u32) {
        self.total_laps = total_laps;
        self.phase = LapPhase::Armed;
    }

    pub fn is_racing(&self) -> bool {
        self.phase == LapPhase::Racing
    }

    pub fn is_finished(&self) -> bool {
        self.phase == LapPhase::Finished
    }

    /// Feed one frame of filtered position and speed.
    pub fn update(
        &mut self,
        x: f64,
        y: f64,
        speed: f64,
        now: f64,
        scoring: &mut ScoringEngine,
    ) -> Option<LapOutcome> {
        if self.phase == LapPhase::Racing {
            self.check_checkpoints(x, y);
            self.check_pit_speed(x, y, speed, now, scoring);
        }

        let new_side = self.rules.line.side(x, y);
        let Some(side) = self.side else {
            self.side = Some(new_side);
            return None;
        };

        let crossed = side != new_side;
        let in_bounds = self.rules.line.within_band(x, y);
        self.side = Some(new_side);

        if crossed && in_bounds {
            self.handle_crossing(now, scoring)
        } else {
            None
        }
    }

    fn handle_crossing(&mut self, now: f64, scoring: &mut ScoringEngine) -> Option<LapOutcome> {
        // Debounce guard, strict: a crossing exactly at the cooldown passes
        if now - self.last_cross < self.rules.min_lap_time {
            return None;
        }

        match self.phase {
            LapPhase::Armed => {
                self.last_cross = now;
                self.phase = LapPhase::Racing;
                self.current_lap = 1;
                self.lap_start = Some(now);
                self.checkpoints_hit.clear();
                scoring.open_lap(self.tag_id, self.current_lap);
                Some(LapOutcome {
                    event: GameEvent::RaceStart {
                        tag_id: self.tag_id,
                        name: self.name.clone(),
                        lap: self.current_lap,
                        time: now,
                    },
                    closed: None,
                })
            }
            LapPhase::Racing => {
                self.last_cross = now;
                let raw = now - self.lap_start.unwrap_or(now);
                self.validate_checkpoints(now, scoring);
                let closed = scoring.close_lap(self.tag_id, raw, now);
                self.lap_times.push(raw);
                self.laps_done += 1;
                let closed_lap = self.current_lap;

                if self.laps_done >= self.total_laps {
                    self.phase = LapPhase::Finished;
                    return Some(LapOutcome {
                        event: GameEvent::RaceFinish {
                            tag_id: self.tag_id,
                            name: self.name.clone(),
                            lap: closed_lap,
                            raw_time: raw,
                            elp: closed.elp_finite(),
                            time: now,
                        },
                        closed: Some(closed),
                    });
                }

                self.current_lap += 1;
                self.lap_start = Some(now);
                self.checkpoints_hit.clear();
                scoring.open_lap(self.tag_id, self.current_lap);
                Some(LapOutcome {
                    event: GameEvent::LapDone {
                        tag_id: self.tag_id,
                        name: self.name.clone(),
                        lap: closed_lap,
                        raw_time: raw,
                        elp: closed.elp_finite(),
                        time: now,
                    },
                    closed: Some(closed),
                })
            }
            // Not armed (or already finished): the crossing is ignored and
            // does not consume the cooldown
            LapPhase::Idle | LapPhase::Finished => None,
        }
    }

    fn check_checkpoints(&mut self, x: f64, y: f64) {
        for (idx, &(cx, cy)) in self.rules.checkpoints.iter().enumerate() {
            if self.checkpoints_hit.contains(&idx) {
                continue;
            }
            if (x - cx).hypot(y - cy) <= self.rules.checkpoint_radius {
                self.checkpoints_hit.insert(idx);
            }
        }
    }

    /// Corner-cut every checkpoint missed this lap (no-op with an empty
    /// checkpoint list).
    fn validate_checkpoints(&self, now: f64, scoring: &mut ScoringEngine) {
        for idx in 0..self.rules.checkpoints.len() {
            if !self.checkpoints_hit.contains(&idx) {
                scoring.corner_cut(self.tag_id, now);
            }
        }
    }

    /// Lap-1 pit rule: overspeeding inside the pit zone near the line.
    fn check_pit_speed(
        &self,
        x: f64,
        y: f64,
        speed: f64,
        now: f64,
        scoring: &mut ScoringEngine,
    ) {
        if self.current_lap != 1 {
            return;
        }
        if self.rules.line.in_pit_zone(x, y) && speed > self.rules.pit_zone_max_speed_cms {
            scoring.overspeed(self.tag_id, now);
        }
    }

    pub fn current_lap_elapsed(&self, now: f64) -> f64 {
        self.lap_start.map(|t| now - t).unwrap_or(0.0)
    }

    pub fn best_raw(&self) -> f64 {
        self.lap_times
            .iter()
            .copied()
            .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |a| a.min(t))))
            .unwrap_or(0.0)
    }

    pub fn info(&self, now: f64) -> LapInfo {
        LapInfo {
            tag_id: self.tag_id,
            name: self.name.clone(),
            current_lap: self.current_lap,
            total_laps: self.total_laps,
            laps_done: self.laps_done,
            is_racing: self.is_racing(),
            race_finished: self.is_finished(),
            current_lap_elapsed: self.current_lap_elapsed(now),
            best_raw: self.best_raw(),
            lap_times: self.lap_times.clone(),
        }
    }

    pub fn reset(&mut self, total_laps: u32) {
        self.phase = LapPhase::Idle;
        self.current_lap = 0;
        self.laps_done = 0;
        self.total_laps = total_laps;
        self.side = None;
        self.lap_start = None;
        self.last_cross = 0.0;
        self.checkpoints_hit.clear();
        self.lap_times.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{LineOrientation, StartLine};

    fn test_config() -> Config {
        Config {
            min_lap_time: 1.0,
            start_line: StartLine {
                orientation: LineOrientation::Vertical,
                x: 100.0,
                y1: 30.0,
                y2: 70.0,
                crossing_threshold: 20.0,
            },
            ..Config::default()
        }
    }

    fn setup(total_laps: u32) -> (LapEngine, ScoringEngine) {
        let cfg = test_config();
        let mut scoring = ScoringEngine::new(&cfg);
        scoring.register(0, "Car0");
        let eng = LapEngine::new(0, "Car0", LapRules::from_config(&cfg), total_laps);
        (eng, scoring)
    }

    #[test]
    fn happy_two_lap_race() {
        let (mut eng, mut scoring) = setup(2);
        eng.arm(2);

        // Establish side, then cross at t=10
        assert!(eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring).is_none());
        let out = eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring).unwrap();
        assert!(matches!(out.event, GameEvent::RaceStart { lap: 1, .. }));
        assert!(eng.is_racing());

        // Lap 1 closes at t=14, raw 4.0
        let out = eng.update(80.0, 50.0, 20.0, 14.0, &mut scoring).unwrap();
        match &out.event {
            GameEvent::LapDone { lap, raw_time, elp, .. } => {
                assert_eq!(*lap, 1);
                assert!((raw_time - 4.0).abs() < 1e-9);
                assert!((elp.unwrap() - 4.0).abs() < 1e-9);
            }
            e => panic!("expected lap_done, got {e:?}"),
        }

        // Lap 2 closes at t=19: race finish
        let out = eng.update(120.0, 50.0, 20.0, 19.0, &mut scoring).unwrap();
        match &out.event {
            GameEvent::RaceFinish { lap, raw_time, .. } => {
                assert_eq!(*lap, 2);
                assert!((raw_time - 5.0).abs() < 1e-9);
            }
            e => panic!("expected race_finish, got {e:?}"),
        }
        assert!(eng.is_finished());
        assert_eq!(eng.laps_done, 2);
        assert_eq!(scoring.laps_done(0), 2);
        assert!((eng.best_raw() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cooldown_suppresses_jitter_crossings() {
        let (mut eng, mut scoring) = setup(5);
        eng.arm(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        assert!(eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring).is_some());
        // Jitter back across the line 0.5 s later: ignored
        assert!(eng.update(80.0, 50.0, 20.0, 10.5, &mut scoring).is_none());
        // Next crossing at 13.1: a 3.1 s lap
        let out = eng.update(120.0, 50.0, 20.0, 13.1, &mut scoring).unwrap();
        match &out.event {
            GameEvent::LapDone { raw_time, .. } => assert!((raw_time - 3.1).abs() < 1e-9),
            e => panic!("expected lap_done, got {e:?}"),
        }
    }

    #[test]
    fn crossing_exactly_at_cooldown_is_accepted() {
        let (mut eng, mut scoring) = setup(5);
        eng.arm(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring);
        // min_lap_time = 1.0; crossing at exactly 11.0 passes the strict check
        let out = eng.update(80.0, 50.0, 20.0, 11.0, &mut scoring);
        assert!(out.is_some());
    }

    #[test]
    fn crossing_outside_band_is_ignored() {
        let (mut eng, mut scoring) = setup(5);
        eng.arm(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        // Side changes but y=80 is outside [30, 70]
        assert!(eng.update(120.0, 80.0, 40.0, 10.0, &mut scoring).is_none());
    }

    #[test]
    fn unarmed_crossing_ignored_and_does_not_consume_cooldown() {
        let (mut eng, mut scoring) = setup(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        assert!(eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring).is_none());
        assert_eq!(eng.phase, LapPhase::Idle);

        // Arm and cross again immediately: accepted because the unarmed
        // crossing did not update last_cross
        eng.arm(5);
        let out = eng.update(80.0, 50.0, 20.0, 10.2, &mut scoring);
        assert!(out.is_some());
    }

    #[test]
    fn missed_checkpoint_penalizes_on_close() {
        let cfg = Config {
            checkpoints: vec![(200.0, 50.0)],
            ..test_config()
        };
        let mut scoring = ScoringEngine::new(&cfg);
        scoring.register(0, "Car0");
        let mut eng = LapEngine::new(0, "Car0", LapRules::from_config(&cfg), 5);
        eng.arm(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring);
        // Never visits the checkpoint; close lap 1
        let out = eng.update(80.0, 50.0, 20.0, 14.0, &mut scoring).unwrap();
        let closed = out.closed.unwrap();
        assert_eq!(closed.corner_cuts, 1);
        assert!((closed.penalty - 3.0).abs() < 1e-9);
    }

    #[test]
    fn touched_checkpoint_is_not_penalized() {
        let cfg = Config {
            checkpoints: vec![(200.0, 50.0)],
            ..test_config()
        };
        let mut scoring = ScoringEngine::new(&cfg);
        scoring.register(0, "Car0");
        let mut eng = LapEngine::new(0, "Car0", LapRules::from_config(&cfg), 5);
        eng.arm(5);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring);
        // Pass within the 25 cm radius
        eng.update(210.0, 50.0, 20.0, 12.0, &mut scoring);
        let out = eng.update(80.0, 50.0, 20.0, 14.0, &mut scoring).unwrap();
        assert_eq!(out.closed.unwrap().corner_cuts, 0);
    }

    #[test]
    fn pit_overspeed_fires_once_on_lap_one_only() {
        let (mut eng, mut scoring) = setup(5);
        eng.arm(5);
        eng.update(80.0, 50.0, 10.0, 9.0, &mut scoring);
        eng.update(120.0, 50.0, 10.0, 10.0, &mut scoring);
        // In the pit zone (x within 50 of line, y in band) above 30 cm/s
        eng.update(120.0, 50.0, 80.0, 10.5, &mut scoring);
        eng.update(125.0, 50.0, 90.0, 10.7, &mut scoring);
        let lap = scoring.current_lap(0).unwrap();
        assert!(lap.overspeed);
        assert!((lap.penalty - 2.0).abs() < 1e-9);

        // Close lap 1; lap 2 overspeed in the zone does not fire
        eng.update(80.0, 50.0, 10.0, 14.0, &mut scoring);
        eng.update(120.0, 50.0, 90.0, 17.5, &mut scoring);
        let lap2 = scoring.current_lap(0).unwrap();
        assert!(!lap2.overspeed);
        assert_eq!(lap2.penalty, 0.0);
    }

    #[test]
    fn reset_returns_to_idle() {
        let (mut eng, mut scoring) = setup(2);
        eng.arm(2);
        eng.update(80.0, 50.0, 20.0, 9.0, &mut scoring);
        eng.update(120.0, 50.0, 20.0, 10.0, &mut scoring);
        eng.reset(10);
        assert_eq!(eng.phase, LapPhase::Idle);
        assert_eq!(eng.current_lap, 0);
        assert_eq!(eng.laps_done, 0);
        assert_eq!(eng.best_raw(), 0.0);
    }
}
