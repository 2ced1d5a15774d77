//! # race
//!
//! Race manager: owns the scoring engine and one lap engine per tag, applies
//! the dynamic race configuration at arm time, and tracks the aggregate race
//! lifecycle (first start → all finished).

use tracing::info;

use crate::config::{Config, RaceConfig};
use crate::lap::{LapEngine, LapInfo, LapOutcome, LapRules};
use crate::events::GameEvent;
use crate::scoring::{PenaltyConfig, ScoringEngine};

#[derive(Debug)]
pub struct RaceManager {
    engines: Vec<LapEngine>,
    pub scoring: ScoringEngine,
    pub config: RaceConfig,
    defaults: RaceConfig,
    static_penalties: PenaltyConfig,
    pub race_active: bool,
    pub race_start_time: Option<f64>,
    pub race_end_time: Option<f64>,
}

impl RaceManager {
    pub fn new(cfg: &Config) -> Self {
        let mut scoring = ScoringEngine::new(cfg);
        let rules = LapRules::from_config(cfg);
        let mut engines = Vec::with_capacity(cfg.tag_count);
        for tag_id in 0..cfg.tag_count {
            let name = format!("Car{tag_id}");
            scoring.register(tag_id, &name);
            engines.push(LapEngine::new(tag_id, &name, rules.clone(), cfg.total_laps));
        }
        let defaults = RaceConfig::defaults(cfg);
        Self {
            engines,
            scoring,
            config: defaults,
            defaults,
            static_penalties: PenaltyConfig::from_config(cfg),
            race_active: false,
            race_start_time: None,
            race_end_time: None,
        }
    }

    /// Admin start: wipe the previous race, apply the merged dynamic
    /// configuration and arm every engine.
    pub fn admin_start(&mut self, rc: RaceConfig) {
        self.reset();
        self.config = rc;
        self.scoring
            .set_penalties(self.static_penalties.with_race_config(&rc));
        for eng in &mut self.engines {
            eng.arm(rc.total_laps);
        }
        info!(
            "🟢 race armed — {} laps | wall={}s atk={}s vic={}s",
            rc.total_laps, rc.wall_hit_penalty, rc.attacker_penalty, rc.victim_bonus
        );
    }

    /// Dispatch one frame to the tag's engine; maintains the race clock.
    pub fn update(
        &mut self,
        tag_id: usize,
        x: f64,
        y: f64,
        speed: f64,
        now: f64,
    ) -> Option<LapOutcome> {
        let eng = self.engines.get_mut(tag_id)?;
        let outcome = eng.update(x, y, speed, now, &mut self.scoring)?;

        match outcome.event {
            GameEvent::RaceStart { .. } if !self.race_active => {
                self.race_active = true;
                self.race_start_time = Some(now);
                info!("🏁 race in progress");
            }
            GameEvent::RaceFinish { .. } => {
                if self.engines.iter().all(|e| e.is_finished()) {
                    self.race_active = false;
                    self.race_end_time = Some(now);
                    if let Some(start) = self.race_start_time {
                        info!("🏆 all finished — {:.2}s total", now - start);
                    }
                }
            }
            _ => {}
        }
        Some(outcome)
    }

    pub fn engine(&self, tag_id: usize) -> Option<&LapEngine> {
        self.engines.get(tag_id)
    }

    pub fn info(&self, tag_id: usize, now: f64) -> Option<LapInfo> {
        self.engines.get(tag_id).map(|e| e.info(now))
    }

    pub fn leaderboard(&self) -> Vec<crate::scoring::LeaderboardRow> {
        self.scoring.leaderboard()
    }

    /// Reset engines, scoring and the race clock; dynamic config reverts to
    /// the boot defaults.
    pub fn reset(&mut self) {
        self.config = self.defaults;
        for eng in &mut self.engines {
            eng.reset(self.config.total_laps);
        }
        self.scoring.reset();
        self.race_active = false;
        self.race_start_time = None;
        self.race_end_time = None;
    }
}
