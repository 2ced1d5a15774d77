//! # scoring
//!
//! ELP scoring: `ELP = max(0, raw + penalties − bonuses)`, or +inf for a
//! voided lap. The engine owns every [`LapScore`] — at most one open lap per
//! tag plus the closed history — and a bounded human-readable incident feed.
//!
//! Penalty and bonus magnitudes live in [`PenaltyConfig`] and are replaced at
//! race arm from the admin payload; reset restores the boot defaults.

use std::collections::{HashMap, VecDeque};

use serde_json::{json, Value};
use tracing::warn;

use crate::config::{Config, RaceConfig};

/// Incident feed ring capacity.
const FEED_CAPACITY: usize = 100;

// ── Penalty configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyConfig {
    pub wall_hit: f64,
    pub attacker: f64,
    pub victim_bonus: f64,
    pub corner_cut: f64,
    pub corner_cut_void_lap: bool,
    pub pit_overspeed: f64,
}

impl PenaltyConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            wall_hit: cfg.wall_hit_penalty,
            attacker: cfg.attacker_penalty,
            victim_bonus: cfg.victim_bonus,
            corner_cut: cfg.corner_cut_penalty,
            corner_cut_void_lap: cfg.corner_cut_void_lap,
            pit_overspeed: cfg.pit_zone_overspeed_penalty,
        }
    }

    /// Overlay the dynamic race-arm values on top of the static ones.
    pub fn with_race_config(mut self, rc: &RaceConfig) -> Self {
        self.wall_hit = rc.wall_hit_penalty;
        self.attacker = rc.attacker_penalty;
        self.victim_bonus = rc.victim_bonus;
        self
    }
}

// ── Lap score ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LapScore {
    pub tag_id: usize,
    pub lap_number: u32,
    pub raw: f64,
    pub penalty: f64,
    pub bonus: f64,
    pub wall_hits: u32,
    pub atk_hits: u32,
    pub vic_hits: u32,
    pub corner_cuts: u32,
    pub overspeed: bool,
    pub voided: bool,
    pub closed_at: Option<f64>,
}

impl LapScore {
    pub fn new(tag_id: usize, lap_number: u32) -> Self {
        Self {
            tag_id,
            lap_number,
            raw: 0.0,
            penalty: 0.0,
            bonus: 0.0,
            wall_hits: 0,
            atk_hits: 0,
            vic_hits: 0,
            corner_cuts: 0,
            overspeed: false,
            voided: false,
            closed_at: None,
        }
    }

    /// Effective lap time. +inf for voided laps, floored at zero otherwise.
    pub fn elp(&self) -> f64 {
        if self.voided {
            f64::INFINITY
        } else {
            (self.raw + self.penalty - self.bonus).max(0.0)
        }
    }

    /// ELP as an optional finite value for JSON surfaces.
    pub fn elp_finite(&self) -> Option<f64> {
        let e = self.elp();
        e.is_finite().then_some(e)
    }

    fn to_wire(&self, name: &str) -> Value {
        json!({
            "tag_id": self.tag_id,
            "name": name,
            "lap": self.lap_number,
            "raw": round3(self.raw),
            "penalty": round3(self.penalty),
            "bonus": round3(self.bonus),
            "elp": self.elp_finite().map(round3),
            "voided": self.voided,
            "closed_at": self.closed_at,
        })
    }
}

// ── Incident feed ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentKind {
    LapClosed,
    WallHit,
    CarContact,
    CornerCut,
    Overspeed,
}

#[derive(Debug, Clone)]
pub struct Incident {
    pub kind: IncidentKind,
    pub text: String,
    pub time: f64,
}

// ── Leaderboard ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct LeaderboardRow {
    pub tag_id: usize,
    pub name: String,
    pub best_elp: f64,
    pub best_raw: f64,
    pub best_lap: u32,
    pub laps_done: u32,
    pub qualifies: bool,
    pub penalty_total: f64,
    pub bonus_total: f64,
}

// ── Scoring engine ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ScoringEngine {
    penalties: PenaltyConfig,
    defaults: PenaltyConfig,
    min_laps_to_qualify: u32,
    names: HashMap<usize, String>,
    open: HashMap<usize, LapScore>,
    history: HashMap<usize, Vec<LapScore>>,
    feed: VecDeque<Incident>,
    orphan_close_reported: bool,
}

impl ScoringEngine {
    pub fn new(cfg: &Config) -> Self {
        let penalties = PenaltyConfig::from_config(cfg);
        Self {
            penalties,
            defaults: penalties,
            min_laps_to_qualify: cfg.min_laps_to_qualify,
            names: HashMap::new(),
            open: HashMap::new(),
            history: HashMap::new(),
            feed: VecDeque::new(),
            orphan_close_reported: false,
        }
    }

    pub fn register(&mut self, tag_id: usize, name: &str) {
        self.names.insert(tag_id, name.to_string());
    }

    pub fn penalties(&self) -> &PenaltyConfig {
        &self.penalties
    }

    /// Applied at race arm; penalties revert on [`reset`](Self::reset).
    pub fn set_penalties(&mut self, penalties: PenaltyConfig) {
        self.penalties = penalties;
    }

    fn name(&self, tag_id: usize) -> String {
        self.names
            .get(&tag_id)
            .cloned()
            .unwrap_or_else(|| format!("Car{tag_id}"))
    }

    fn push_incident(&mut self, kind: IncidentKind, text: String, time: f64) {
        self.feed.push_back(Incident { kind, text, time });
        while self.feed.len() > FEED_CAPACITY {
            self.feed.pop_front();
        }
    }

    // ── lap lifecycle ────────────────────────────────────────────────────

    /// Open a lap for the tag, replacing any previous open lap.
    pub fn open_lap(&mut self, tag_id: usize, lap_number: u32) {
        self.open.insert(tag_id, LapScore::new(tag_id, lap_number));
    }

    /// Close the open lap with the measured raw time. Closing with no open
    /// lap is an internal invariant violation: it degrades to a zero-lap
    /// closure and is logged once.
    pub fn close_lap(&mut self, tag_id: usize, raw: f64, now: f64) -> LapScore {
        let mut lap = match self.open.remove(&tag_id) {
            Some(lap) => lap,
            None => {
                if !self.orphan_close_reported {
                    warn!("close_lap without an open lap (tag {tag_id}); recording lap 0");
                    self.orphan_close_reported = true;
                }
                LapScore::new(tag_id, 0)
            }
        };
        lap.raw = raw;
        lap.closed_at = Some(now);
        let name = self.name(tag_id);
        let text = format!(
            "📊 LAP | {} Lap {} raw={:.2}s ELP={:.2}s",
            name,
            lap.lap_number,
            raw,
            lap.elp()
        );
        self.push_incident(IncidentKind::LapClosed, text, now);
        self.history.entry(tag_id).or_default().push(lap.clone());
        lap
    }

    pub fn current_lap(&self, tag_id: usize) -> Option<&LapScore> {
        self.open.get(&tag_id)
    }

    // ── penalty/bonus mutations (no-ops without an open lap) ─────────────

    pub fn wall_hit(&mut self, tag_id: usize, now: f64) {
        let wall_penalty = self.penalties.wall_hit;
        let name = self.name(tag_id);
        let Some(lap) = self.open.get_mut(&tag_id) else {
            return;
        };
        lap.wall_hits += 1;
        lap.penalty += wall_penalty;
        let lap_number = lap.lap_number;
        let text = format!("🚧 WALL {name} Lap {lap_number} +{wall_penalty}s");
        self.push_incident(IncidentKind::WallHit, text, now);
    }

    pub fn car_collision(&mut self, attacker_id: usize, victim_id: usize, now: f64) {
        let (atk_pen, vic_bon) = (self.penalties.attacker, self.penalties.victim_bonus);
        if let Some(lap) = self.open.get_mut(&attacker_id) {
            lap.atk_hits += 1;
            lap.penalty += atk_pen;
        }
        if let Some(lap) = self.open.get_mut(&victim_id) {
            lap.vic_hits += 1;
            lap.bonus += vic_bon;
        }
        let text = format!(
            "💥 {} → {} | +{atk_pen}s / -{vic_bon}s",
            self.name(attacker_id),
            self.name(victim_id)
        );
        self.push_incident(IncidentKind::CarContact, text, now);
    }

    pub fn corner_cut(&mut self, tag_id: usize, now: f64) {
        let (cut_penalty, void_lap) = (self.penalties.corner_cut, self.penalties.corner_cut_void_lap);
        let name = self.name(tag_id);
        let Some(lap) = self.open.get_mut(&tag_id) else {
            return;
        };
        lap.corner_cuts += 1;
        let lap_number = lap.lap_number;
        let text = if void_lap {
            lap.voided = true;
            format!("⛔ VOID {name} Lap {lap_number}")
        } else {
            lap.penalty += cut_penalty;
            format!("🔶 CUT {name} Lap {lap_number} +{cut_penalty}s")
        };
        self.push_incident(IncidentKind::CornerCut, text, now);
    }

    /// First call within a lap applies the pit-zone penalty; later calls in
    /// the same lap are ignored.
    pub fn overspeed(&mut self, tag_id: usize, now: f64) {
        let pit_penalty = self.penalties.pit_overspeed;
        let name = self.name(tag_id);
        let Some(lap) = self.open.get_mut(&tag_id) else {
            return;
        };
        if lap.overspeed {
            return;
        }
        lap.overspeed = true;
        lap.penalty += pit_penalty;
        let lap_number = lap.lap_number;
        let text = format!("🚨 SPD {name} Lap {lap_number} +{pit_penalty}s");
        self.push_incident(IncidentKind::Overspeed, text, now);
    }

    // ── queries ──────────────────────────────────────────────────────────

    pub fn best_elp(&self, tag_id: usize) -> f64 {
        self.history
            .get(&tag_id)
            .into_iter()
            .flatten()
            .filter(|l| !l.voided)
            .map(|l| l.elp())
            .fold(f64::INFINITY, f64::min)
    }

    /// Closed, non-voided laps in the tag's history.
    pub fn laps_done(&self, tag_id: usize) -> u32 {
        self.history
            .get(&tag_id)
            .map(|laps| laps.iter().filter(|l| !l.voided).count() as u32)
            .unwrap_or(0)
    }

    pub fn qualifies(&self, tag_id: usize) -> bool {
        self.laps_done(tag_id) >= self.min_laps_to_qualify
    }

    /// ELP leaderboard: per tag with at least one non-voided closed lap, the
    /// lap minimizing (ELP, close instant). Rows ascend by (best ELP, lap).
    pub fn leaderboard(&self) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = Vec::new();
        let mut tag_ids: Vec<usize> = self.history.keys().copied().collect();
        tag_ids.sort_unstable();

        for tag_id in tag_ids {
            let Some(laps) = self.history.get(&tag_id) else {
                continue;
            };
            let best = laps
                .iter()
                .filter(|l| !l.voided)
                .min_by(|a, b| {
                    a.elp()
                        .total_cmp(&b.elp())
                        .then(a.closed_at.unwrap_or(0.0).total_cmp(&b.closed_at.unwrap_or(0.0)))
                });
            let Some(best) = best else {
                continue;
            };
            rows.push(LeaderboardRow {
                tag_id,
                name: self.name(tag_id),
                best_elp: round3(best.elp()),
                best_raw: round3(best.raw),
                best_lap: best.lap_number,
                laps_done: self.laps_done(tag_id),
                qualifies: self.qualifies(tag_id),
                penalty_total: round2(laps.iter().map(|l| l.penalty).sum()),
                bonus_total: round2(laps.iter().map(|l| l.bonus).sum()),
            });
        }
        rows.sort_by(|a, b| {
            a.best_elp
                .total_cmp(&b.best_elp)
                .then(a.best_lap.cmp(&b.best_lap))
        });
        rows
    }

    /// Scoring block for one car in a `state_update` message.
    pub fn car_summary(&self, tag_id: usize) -> Value {
        let history: Vec<Value> = self
            .history
            .get(&tag_id)
            .into_iter()
            .flatten()
            .map(|l| l.to_wire(&self.name(tag_id)))
            .collect();
        let best = self.best_elp(tag_id);
        json!({
            "tag_id": tag_id,
            "name": self.name(tag_id),
            "best_elp": best.is_finite().then(|| round3(best)),
            "laps_done": self.laps_done(tag_id),
            "qualifies": self.qualifies(tag_id),
            "open_lap": self.open.get(&tag_id).map(|l| l.to_wire(&self.name(tag_id))),
            "history": history,
        })
    }

    /// Last `n` incident lines, oldest first.
    pub fn feed(&self, n: usize) -> Vec<&Incident> {
        let len = self.feed.len();
        self.feed.iter().skip(len.saturating_sub(n)).collect()
    }

    pub fn feed_texts(&self, n: usize) -> Vec<String> {
        self.feed(n).into_iter().map(|i| i.text.clone()).collect()
    }

    /// Clear all lap state and restore default penalties.
    pub fn reset(&mut self) {
        self.history.clear();
        self.open.clear();
        self.feed.clear();
        self.penalties = self.defaults;
        self.orphan_close_reported = false;
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub(crate) fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
