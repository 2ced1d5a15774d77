//! # collision
//!
//! Shared contact detection, run once per frame over a snapshot of every
//! active tag:
//!
//! 1. ingest positions/speeds, feed the rolling track-speed window, flag
//!    implausible speed samples
//! 2. ghost check — a tag far below the track average for long enough is
//!    suppressed from car-pair detection until it speeds back up
//! 3. car pairs — proximity with per-pair cooldown and attacker arbitration
//!    (faster car, or the lower tag id when speeds are close)
//! 4. walls — perpendicular distance to the outer/inner boundary with a
//!    per-tag cooldown
//!
//! Scoring mutations go through the narrow `wall_hit` / `car_collision`
//! interface; the engine itself owns only derived caches.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::events::{GameEvent, WallSide};
use crate::scoring::ScoringEngine;
use crate::track::{dist_to_boundary, Track};

/// Rolling track-speed window size.
const SPEED_WINDOW: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct CarSnapshot {
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub lap: u32,
    pub racing: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CollisionRules {
    pub distance_cm: f64,
    pub pair_cooldown: f64,
    pub speed_diff_threshold: f64,
    pub wall_tolerance_cm: f64,
    pub wall_cooldown: f64,
    pub ghost_speed_fraction: f64,
    pub ghost_time_threshold: f64,
    pub max_plausible_speed_cms: f64,
}

impl CollisionRules {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            distance_cm: cfg.car_collision_distance_cm,
            pair_cooldown: cfg.car_collision_cooldown,
            speed_diff_threshold: cfg.speed_diff_threshold,
            wall_tolerance_cm: cfg.wall_tolerance_cm,
            wall_cooldown: cfg.wall_collision_cooldown,
            ghost_speed_fraction: cfg.ghosting_speed_threshold,
            ghost_time_threshold: cfg.ghosting_time_threshold,
            max_plausible_speed_cms: cfg.max_plausible_speed_cms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub tag_id: usize,
    pub speed: f64,
    pub time: f64,
}

#[derive(Debug)]
pub struct CollisionEngine {
    rules: CollisionRules,
    names: HashMap<usize, String>,
    laps: HashMap<usize, u32>,
    /// Unordered pair (lo, hi) → last collision instant.
    pair_cooldowns: HashMap<(usize, usize), f64>,
    wall_cooldowns: HashMap<usize, f64>,
    /// When each tag entered the low-speed band.
    ghost_since: HashMap<usize, f64>,
    speed_window: VecDeque<f64>,
    wall_hit_counts: HashMap<usize, u32>,
    car_event_counts: HashMap<usize, u32>,
    anomalies: Vec<AnomalyRecord>,
}

impl CollisionEngine {
    pub fn new(rules: CollisionRules) -> Self {
        Self {
            rules,
            names: HashMap::new(),
            laps: HashMap::new(),
            pair_cooldowns: HashMap::new(),
            wall_cooldowns: HashMap::new(),
            ghost_since: HashMap::new(),
            speed_window: VecDeque::new(),
            wall_hit_counts: HashMap::new(),
            car_event_counts: HashMap::new(),
            anomalies: Vec::new(),
        }
    }

    pub fn register(&mut self, tag_id: usize, name: &str) {
        self.names.insert(tag_id, name.to_string());
    }

    fn name(&self, tag_id: usize) -> String {
        self.names
            .get(&tag_id)
            .cloned()
            .unwrap_or_else(|| format!("Car{tag_id}"))
    }

    /// One detection sweep. Events are returned in production order: car
    /// pairs first, then walls.
    pub fn update(
        &mut self,
        cars: &BTreeMap<usize, CarSnapshot>,
        now: f64,
        track: &Track,
        scoring: &mut ScoringEngine,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();

        // Step 1: snapshot ingest
        for (&tag_id, car) in cars {
            self.laps.insert(tag_id, car.lap);
            if car.speed > 0.0 {
                self.speed_window.push_back(car.speed);
                while self.speed_window.len() > SPEED_WINDOW {
                    self.speed_window.pop_front();
                }
            }
            if car.speed > self.rules.max_plausible_speed_cms {
                warn!(
                    "⚠️  anomaly: {} speed {:.0} cm/s ({:.1} km/h)",
                    self.name(tag_id),
                    car.speed,
                    car.speed * 0.036
                );
                self.anomalies.push(AnomalyRecord {
                    tag_id,
                    speed: car.speed,
                    time: now,
                });
            }
        }

        // Step 2: ghost timers for every tag in the snapshot
        let mut ghosted: HashSet<usize> = HashSet::new();
        for (&tag_id, car) in cars {
            if self.ghost_check(tag_id, car.speed, now) {
                ghosted.insert(tag_id);
            }
        }

        // Step 3: car pairs over racing, non-ghosted tags (sorted ids, so
        // the tie-break attacker is always the lower id)
        let racing_ids: Vec<usize> = cars
            .iter()
            .filter(|(_, c)| c.racing)
            .map(|(&id, _)| id)
            .collect();
        for i in 0..racing_ids.len() {
            for j in (i + 1)..racing_ids.len() {
                let (a, b) = (racing_ids[i], racing_ids[j]);
                if ghosted.contains(&a) || ghosted.contains(&b) {
                    continue;
                }
                if let Some(e) = self.check_pair(a, b, cars, now, scoring) {
                    events.push(e);
                }
            }
        }

        // Step 4: walls for racing tags
        for (&tag_id, car) in cars.iter().filter(|(_, c)| c.racing) {
            if let Some(e) = self.check_wall(tag_id, car, now, track, scoring) {
                events.push(e);
            }
        }

        events
    }

    fn check_pair(
        &mut self,
        a: usize,
        b: usize,
        cars: &BTreeMap<usize, CarSnapshot>,
        now: f64,
        scoring: &mut ScoringEngine,
    ) -> Option<GameEvent> {
        let (ca, cb) = (cars.get(&a)?, cars.get(&b)?);
        let dist = (ca.x - cb.x).hypot(ca.y - cb.y);
        if dist > self.rules.distance_cm {
            return None;
        }

        let key = (a.min(b), a.max(b));
        if let Some(&last) = self.pair_cooldowns.get(&key) {
            if now - last < self.rules.pair_cooldown {
                return None;
            }
        }
        self.pair_cooldowns.insert(key, now);

        // Attacker arbitration: the clearly faster car, otherwise the lower
        // tag id (a < b by construction)
        let (attacker, victim) = if (ca.speed - cb.speed).abs() >= self.rules.speed_diff_threshold {
            if ca.speed >= cb.speed { (a, b) } else { (b, a) }
        } else {
            (a, b)
        };

        scoring.car_collision(attacker, victim, now);
        *self.car_event_counts.entry(a).or_insert(0) += 1;
        *self.car_event_counts.entry(b).or_insert(0) += 1;

        let lap = self.laps.get(&attacker).copied().unwrap_or(0);
        debug!(
            "💥 car contact {} → {} dist={:.1}cm lap {}",
            self.name(attacker),
            self.name(victim),
            dist,
            lap
        );
        Some(GameEvent::Car {
            attacker,
            victim,
            attacker_name: self.name(attacker),
            victim_name: self.name(victim),
            dist,
            lap,
            time: now,
        })
    }

    fn check_wall(
        &mut self,
        tag_id: usize,
        car: &CarSnapshot,
        now: f64,
        track: &Track,
        scoring: &mut ScoringEngine,
    ) -> Option<GameEvent> {
        if let Some(&last) = self.wall_cooldowns.get(&tag_id) {
            if now - last < self.rules.wall_cooldown {
                return None;
            }
        }

        let outer = dist_to_boundary(car.x, car.y, &track.outer_points);
        let inner = dist_to_boundary(car.x, car.y, &track.inner_points);
        let wall = if outer <= self.rules.wall_tolerance_cm {
            WallSide::Outer
        } else if inner <= self.rules.wall_tolerance_cm {
            WallSide::Inner
        } else {
            return None;
        };

        self.wall_cooldowns.insert(tag_id, now);
        scoring.wall_hit(tag_id, now);
        *self.wall_hit_counts.entry(tag_id).or_insert(0) += 1;

        debug!("🚧 wall hit {} ({wall:?}) lap {}", self.name(tag_id), car.lap);
        Some(GameEvent::Wall {
            tag_id,
            name: self.name(tag_id),
            wall,
            lap: car.lap,
            time: now,
        })
    }

    /// Update the tag's low-speed timer and report whether it is ghosted.
    fn ghost_check(&mut self, tag_id: usize, speed: f64, now: f64) -> bool {
        let avg = if self.speed_window.is_empty() {
            1.0
        } else {
            self.speed_window.iter().sum::<f64>() / self.speed_window.len() as f64
        };
        if speed < avg * self.rules.ghost_speed_fraction {
            match self.ghost_since.get(&tag_id) {
                None => {
                    self.ghost_since.insert(tag_id, now);
                    false
                }
                Some(&since) => now - since > self.rules.ghost_time_threshold,
            }
        } else {
            self.ghost_since.remove(&tag_id);
            false
        }
    }

    pub fn wall_hits(&self, tag_id: usize) -> u32 {
        self.wall_hit_counts.get(&tag_id).copied().unwrap_or(0)
    }

    pub fn car_events(&self, tag_id: usize) -> u32 {
        self.car_event_counts.get(&tag_id).copied().unwrap_or(0)
    }

    pub fn anomalies(&self) -> &[AnomalyRecord] {
        &self.anomalies
    }

    pub fn reset(&mut self) {
        self.pair_cooldowns.clear();
        self.wall_cooldowns.clear();
        self.ghost_since.clear();
        self.speed_window.clear();
        self.wall_hit_counts.clear();
        self.car_event_counts.clear();
        self.anomalies.clear();
        self.laps.clear();
    }
}
