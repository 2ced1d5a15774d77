//! # world
//!
//! The single-writer state bundle: tags, race manager, collision engine,
//! track and bridge counters, shared as `Arc<RwLock<World>>`. The ingress
//! task and the admin handlers serialize through the write lock, so one
//! packet and the admin commands issued around it never interleave.
//!
//! `process_datagram` is the whole frame pipeline: decode → solve → smooth →
//! lap engine → collision sweep → outbound messages.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use race_types::RangePacket;

use crate::collision::{CarSnapshot, CollisionEngine, CollisionRules};
use crate::config::{Config, RaceConfig, RaceConfigPayload};
use crate::events::GameEvent;
use crate::persistence::LapRecord;
use crate::positioning::Solver;
use crate::race::RaceManager;
use crate::scoring::round2;
use crate::tag::Tag;
use crate::track::{create_oval_track, Track};

pub type SharedWorld = Arc<RwLock<World>>;

/// Wall-clock seconds since the UNIX epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ── Bridge counters ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BridgeStats {
    pub udp_packets_total: u64,
    pub udp_packets_valid: u64,
    pub udp_packets_invalid: u64,
    pub ws_messages_sent: u64,
    pub ws_clients: u64,
    pub ws_clients_total: u64,
    pub tags_seen: BTreeSet<usize>,
    pub start_time: f64,
}

impl BridgeStats {
    fn new(start_time: f64) -> Self {
        Self {
            udp_packets_total: 0,
            udp_packets_valid: 0,
            udp_packets_invalid: 0,
            ws_messages_sent: 0,
            ws_clients: 0,
            ws_clients_total: 0,
            tags_seen: BTreeSet::new(),
            start_time,
        }
    }
}

// ── Frame output ──────────────────────────────────────────────────────────────

/// What one accepted packet produces for the outside world.
#[derive(Debug)]
pub struct FrameOutput {
    /// `tag_position` message, one per accepted packet.
    pub position_msg: String,
    /// Full `state_update`, present when any game event fired this frame.
    pub state_msg: Option<String>,
    /// Closed laps mapped to their persistence group, ready for the sink.
    pub closed_laps: Vec<LapRecord>,
}

// ── World ─────────────────────────────────────────────────────────────────────

pub struct World {
    pub cfg: Config,
    pub track: Track,
    pub tags: Vec<Tag>,
    pub race: RaceManager,
    pub collisions: CollisionEngine,
    solver: Solver,
    pub race_armed: bool,
    pub group_id: Option<i64>,
    pub tag_to_gp: HashMap<usize, i64>,
    pub stats: BridgeStats,
}

impl World {
    pub fn new(cfg: Config) -> Self {
        Self::with_start_time(cfg, now_secs())
    }

    pub fn with_start_time(cfg: Config, start_time: f64) -> Self {
        let track = create_oval_track(
            cfg.track.center.0,
            cfg.track.center.1,
            cfg.track.outer_radius.0,
            cfg.track.outer_radius.1,
            cfg.track.width,
            cfg.track.points,
        );
        let tags: Vec<Tag> = (0..cfg.tag_count).map(|id| Tag::new(id, &cfg)).collect();
        let race = RaceManager::new(&cfg);
        let mut collisions = CollisionEngine::new(CollisionRules::from_config(&cfg));
        for tag in &tags {
            collisions.register(tag.id, &tag.name);
        }
        let solver = Solver::new(cfg.anchor_positions.clone(), cfg.rssi);
        Self {
            cfg,
            track,
            tags,
            race,
            collisions,
            solver,
            race_armed: false,
            group_id: None,
            tag_to_gp: HashMap::new(),
            stats: BridgeStats::new(start_time),
        }
    }

    // ── frame pipeline ───────────────────────────────────────────────────

    /// Decode and process one datagram. Returns None when the packet is
    /// dropped; counters record why.
    pub fn process_datagram(&mut self, data: &[u8], now: f64) -> Option<FrameOutput> {
        self.stats.udp_packets_total += 1;

        let pkt: RangePacket = match serde_json::from_slice(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("malformed ingress packet: {e}");
                self.stats.udp_packets_invalid += 1;
                return None;
            }
        };
        self.process_packet(&pkt, now)
    }

    /// The frame pipeline for an already-decoded packet.
    pub fn process_packet(&mut self, pkt: &RangePacket, now: f64) -> Option<FrameOutput> {
        if pkt.id < 0 || pkt.id as usize >= self.cfg.tag_count {
            debug!("unknown tag id {}", pkt.id);
            self.stats.udp_packets_invalid += 1;
            return None;
        }
        if pkt.range.len() < self.cfg.anchor_count {
            debug!(
                "short range array from tag {} ({} < {})",
                pkt.id,
                pkt.range.len(),
                self.cfg.anchor_count
            );
            self.stats.udp_packets_invalid += 1;
            return None;
        }
        let tag_id = pkt.id as usize;
        let ranges = &pkt.range[..self.cfg.anchor_count];

        let fix = match self.solver.solve(ranges, &pkt.rssi) {
            Ok(fix) => fix,
            Err(e) => {
                debug!("solver dropped packet from tag {tag_id}: {e}");
                self.stats.udp_packets_invalid += 1;
                return None;
            }
        };

        self.stats.udp_packets_valid += 1;
        self.stats.tags_seen.insert(tag_id);

        let (x, y, speed) = {
            let tag = &mut self.tags[tag_id];
            tag.update_position(fix.x, fix.y, fix.quality, fix.anchor_count, now);
            if tag.update_count % 20 == 0 {
                debug!(
                    "tag {tag_id}: ({:.0},{:.0})cm qual={} spd={:.1}{}",
                    tag.x,
                    tag.y,
                    tag.quality.as_str(),
                    tag.speed_display(),
                    tag.speed_unit_label()
                );
            }
            (tag.x, tag.y, tag.speed_cms)
        };

        // Race + collision processing for this frame
        let mut events: Vec<GameEvent> = Vec::new();
        let mut closed_laps = Vec::new();
        if let Some(outcome) = self.race.update(tag_id, x, y, speed, now) {
            if let Some(closed) = &outcome.closed {
                match self.tag_to_gp.get(&tag_id) {
                    Some(&gp_id) => closed_laps.push(LapRecord::new(gp_id, closed)),
                    None => warn!("no gp_id mapped for tag {tag_id} — lap not persisted"),
                }
            }
            events.push(outcome.event);
        }

        let snapshot = self.collision_snapshot(now);
        if !snapshot.is_empty() {
            events.extend(
                self.collisions
                    .update(&snapshot, now, &self.track, &mut self.race.scoring),
            );
        }

        let tag = &self.tags[tag_id];
        let position_msg = json!({
            "type": "tag_position",
            "tag_id": tag_id,
            "x": round1(tag.x),
            "y": round1(tag.y),
            "raw_x": round1(tag.raw_x),
            "raw_y": round1(tag.raw_y),
            "range": ranges,
            "speed": round2(tag.speed_display()),
            "speed_cms": round1(tag.speed_cms),
            "speed_unit": tag.speed_unit_label(),
            "quality": tag.quality.as_str(),
            "anchor_count": tag.anchor_count,
            "timestamp": now,
            "game_events": events,
        })
        .to_string();

        let state_msg = (!events.is_empty()).then(|| self.state_message(now));

        Some(FrameOutput {
            position_msg,
            state_msg,
            closed_laps,
        })
    }

    fn collision_snapshot(&self, now: f64) -> BTreeMap<usize, CarSnapshot> {
        let mut cars = BTreeMap::new();
        for tag in &self.tags {
            if !tag.is_active(now) {
                continue;
            }
            let Some(eng) = self.race.engine(tag.id) else {
                continue;
            };
            cars.insert(
                tag.id,
                CarSnapshot {
                    x: tag.x,
                    y: tag.y,
                    speed: tag.speed_cms,
                    lap: eng.current_lap,
                    racing: eng.is_racing(),
                },
            );
        }
        cars
    }

    // ── admin operations ─────────────────────────────────────────────────

    /// Apply an `admin_start`: merge the dynamic configuration, wipe the
    /// previous race, arm every engine. Returns the applied configuration.
    pub fn admin_start(
        &mut self,
        group_id: Option<i64>,
        total_laps: Option<i64>,
        tag_map: Option<&HashMap<String, i64>>,
        race_config: Option<&RaceConfigPayload>,
    ) -> RaceConfig {
        let rc = RaceConfig::merge(&self.cfg, total_laps, race_config);

        self.tag_to_gp.clear();
        match tag_map {
            Some(map) if !map.is_empty() => {
                for (key, &gp) in map {
                    match key.parse::<usize>() {
                        Ok(tag_id) => {
                            self.tag_to_gp.insert(tag_id, gp);
                        }
                        Err(_) => warn!("ignoring non-numeric tag_map key {key:?}"),
                    }
                }
                debug!("tag→gp map: {:?}", self.tag_to_gp);
            }
            _ => warn!("admin_start without tag_map — laps will not be persisted"),
        }

        self.group_id = group_id;
        self.race.admin_start(rc);
        self.race_armed = true;
        rc
    }

    /// Full reset: race, collision caches, tags, persistence map and the
    /// dynamic configuration.
    pub fn admin_reset(&mut self) {
        self.race.reset();
        self.collisions.reset();
        self.race_armed = false;
        self.tag_to_gp.clear();
        self.group_id = None;
        for tag in &mut self.tags {
            tag.reset();
        }
    }

    // ── outbound message builders ────────────────────────────────────────

    /// Greeting sent once per client connect.
    pub fn connection_message(&self, now: f64) -> String {
        let anchors: serde_json::Map<String, Value> = self
            .cfg
            .anchor_positions
            .iter()
            .map(|(id, (x, y))| (id.to_string(), json!({ "x": x, "y": y })))
            .collect();
        json!({
            "type": "connection",
            "status": "connected",
            "message": "Connected to the UWB race control backend",
            "timestamp": now,
            "server_info": {
                "udp_port": self.cfg.udp_port,
                "ws_port": self.cfg.ws_port,
                "anchor_count": self.cfg.anchor_count,
                "tag_count": self.cfg.tag_count,
                "total_laps": self.race.config.total_laps,
                "uptime_seconds": now - self.stats.start_time,
            },
            "anchors": anchors,
            "track": {
                "outer_points": self.track.outer_points,
                "inner_points": self.track.inner_points,
            },
            "stats": {
                "packets_received": self.stats.udp_packets_valid,
                "tags_seen": self.stats.tags_seen,
            },
        })
        .to_string()
    }

    /// Full `state_update` for broadcast and `get_state`.
    pub fn state_message(&self, now: f64) -> String {
        let mut cars = Vec::new();
        for tag in &self.tags {
            if !tag.is_active(now) {
                continue;
            }
            let trail: Vec<[f64; 2]> = tag
                .trail()
                .map(|&(x, y, _)| [round1(x), round1(y)])
                .collect();
            cars.push(json!({
                "tag_id": tag.id,
                "name": tag.name,
                "x": round1(tag.x),
                "y": round1(tag.y),
                "raw_x": round1(tag.raw_x),
                "raw_y": round1(tag.raw_y),
                "speed": round2(tag.speed_display()),
                "speed_unit": tag.speed_unit_label(),
                "speed_cms": round1(tag.speed_cms),
                "quality": tag.quality.as_str(),
                "anchor_count": tag.anchor_count,
                "trail": trail,
                "lap_info": self.race.info(tag.id, now),
                "scoring": self.race.scoring.car_summary(tag.id),
                "wall_hits": self.collisions.wall_hits(tag.id),
                "car_collisions": self.collisions.car_events(tag.id),
            }));
        }
        json!({
            "type": "state_update",
            "timestamp": now,
            "race_active": self.race.race_active,
            "race_armed": self.race_armed,
            "total_laps": self.race.config.total_laps,
            "group_id": self.group_id,
            "race_config": self.race_config_json(),
            "cars": cars,
            "leaderboard": self.race.leaderboard(),
            "feed": self.race.scoring.feed_texts(10),
        })
        .to_string()
    }

    /// Unicast reply to `get_stats`.
    pub fn stats_message(&self, now: f64) -> String {
        let tag_to_gp: serde_json::Map<String, Value> = self
            .tag_to_gp
            .iter()
            .map(|(tag, gp)| (tag.to_string(), json!(gp)))
            .collect();
        json!({
            "type": "stats",
            "udp_packets_total": self.stats.udp_packets_total,
            "udp_packets_valid": self.stats.udp_packets_valid,
            "udp_packets_invalid": self.stats.udp_packets_invalid,
            "ws_messages_sent": self.stats.ws_messages_sent,
            "ws_clients": self.stats.ws_clients,
            "tags_seen": self.stats.tags_seen,
            "uptime_seconds": now - self.stats.start_time,
            "total_laps": self.race.config.total_laps,
            "group_id": self.group_id,
            "tag_to_gp": tag_to_gp,
            "race_config": self.race_config_json(),
            "leaderboard": self.race.leaderboard(),
            "feed": self.race.scoring.feed_texts(20),
            "timestamp": now,
        })
        .to_string()
    }

    pub fn race_config_json(&self) -> Value {
        json!({
            "wall_hit_penalty": self.race.config.wall_hit_penalty,
            "attacker_penalty": self.race.config.attacker_penalty,
            "victim_bonus": self.race.config.victim_bonus,
        })
    }

    /// `admin_event` broadcast after arming.
    pub fn race_armed_message(&self, now: f64) -> String {
        let rc = &self.race.config;
        json!({
            "type": "admin_event",
            "event": "race_armed",
            "message": format!(
                "Race armed — {} laps | wall={}s atk={}s vic={}s",
                rc.total_laps, rc.wall_hit_penalty, rc.attacker_penalty, rc.victim_bonus
            ),
            "total_laps": rc.total_laps,
            "group_id": self.group_id,
            "race_config": self.race_config_json(),
            "timestamp": now,
        })
        .to_string()
    }

    /// `admin_event` broadcast after a reset.
    pub fn race_reset_message(&self, now: f64) -> String {
        json!({
            "type": "admin_event",
            "event": "race_reset",
            "message": "Race reset — config restored to defaults",
            "timestamp": now,
        })
        .to_string()
    }
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{LineOrientation, StartLine};

    /// Square anchor frame with the start line between (100,30)-(100,70),
    /// two laps to win — the end-to-end scenario geometry.
    fn test_config() -> Config {
        Config {
            anchor_positions: HashMap::from([
                (0, (0.0, 0.0)),
                (1, (200.0, 0.0)),
                (2, (200.0, 200.0)),
                (3, (0.0, 200.0)),
            ]),
            tag_count: 2,
            total_laps: 2,
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

    fn packet_at(id: i64, x: f64, y: f64) -> Vec<u8> {
        let anchors = [(0.0, 0.0), (200.0, 0.0), (200.0, 200.0), (0.0, 200.0)];
        let ranges: Vec<f64> = anchors
            .iter()
            .map(|&(ax, ay)| (x - ax).hypot(y - ay))
            .collect();
        serde_json::to_vec(&RangePacket::new(id, ranges, vec![])).unwrap()
    }

    fn world() -> World {
        World::with_start_time(test_config(), 0.0)
    }

    #[test]
    fn malformed_and_invalid_packets_are_counted_and_dropped() {
        let mut w = world();
        assert!(w.process_datagram(b"not json", 1.0).is_none());
        assert!(w.process_datagram(br#"{"id":99,"range":[1,2,3,4]}"#, 1.0).is_none());
        assert!(w.process_datagram(br#"{"id":0,"range":[1,2]}"#, 1.0).is_none());
        // Underdetermined: single valid range
        assert!(w.process_datagram(br#"{"id":0,"range":[50,0,0,0]}"#, 1.0).is_none());
        assert_eq!(w.stats.udp_packets_total, 4);
        assert_eq!(w.stats.udp_packets_invalid, 4);
        assert_eq!(w.stats.udp_packets_valid, 0);
        assert!(!w.tags[0].is_active(1.0));
    }

    #[test]
    fn accepted_packet_emits_position_message() {
        let mut w = world();
        let out = w.process_datagram(&packet_at(0, 80.0, 50.0), 10.0).unwrap();
        assert!(out.state_msg.is_none());
        let v: Value = serde_json::from_str(&out.position_msg).unwrap();
        assert_eq!(v["type"], "tag_position");
        assert_eq!(v["tag_id"], 0);
        assert_eq!(v["quality"], "excellent");
        assert_eq!(v["anchor_count"], 4);
        assert!((v["x"].as_f64().unwrap() - 80.0).abs() < 0.11);
        assert!(v["game_events"].as_array().unwrap().is_empty());
        assert_eq!(w.stats.udp_packets_valid, 1);
    }

    #[test]
    fn full_race_through_the_packet_pipeline() {
        let mut w = world();
        w.admin_start(Some(12), Some(2), Some(&HashMap::from([("0".to_string(), 42)])), None);

        // Approach, then cross at t=10
        w.process_datagram(&packet_at(0, 80.0, 50.0), 9.0);
        let out = w.process_datagram(&packet_at(0, 120.0, 50.0), 10.0).unwrap();
        let v: Value = serde_json::from_str(&out.position_msg).unwrap();
        assert_eq!(v["game_events"][0]["type"], "race_start");
        assert!(out.state_msg.is_some());

        // Back across at t=14: lap 1 closes, raw ≈ 4.0
        let out = w.process_datagram(&packet_at(0, 80.0, 50.0), 14.0).unwrap();
        let v: Value = serde_json::from_str(&out.position_msg).unwrap();
        assert_eq!(v["game_events"][0]["type"], "lap_done");
        assert!((v["game_events"][0]["raw_time"].as_f64().unwrap() - 4.0).abs() < 1e-6);
        assert_eq!(out.closed_laps.len(), 1);
        assert_eq!(out.closed_laps[0].gp_id, 42);
        assert_eq!(out.closed_laps[0].lap_number, 1);

        // Final crossing at t=19: race finish, leaderboard has the best lap
        let out = w.process_datagram(&packet_at(0, 120.0, 50.0), 19.0).unwrap();
        let v: Value = serde_json::from_str(&out.position_msg).unwrap();
        assert_eq!(v["game_events"][0]["type"], "race_finish");

        let state: Value = serde_json::from_str(&out.state_msg.unwrap()).unwrap();
        assert_eq!(state["type"], "state_update");
        assert_eq!(state["race_active"], false);
        let row = &state["leaderboard"][0];
        assert_eq!(row["tag_id"], 0);
        assert_eq!(row["laps_done"], 2);
        assert!((row["best_elp"].as_f64().unwrap() - 4.0).abs() < 0.01);
    }

    #[test]
    fn unmapped_tag_lap_is_not_persisted() {
        let mut w = world();
        w.admin_start(None, Some(2), None, None);
        w.process_datagram(&packet_at(0, 80.0, 50.0), 9.0);
        w.process_datagram(&packet_at(0, 120.0, 50.0), 10.0);
        let out = w.process_datagram(&packet_at(0, 80.0, 50.0), 14.0).unwrap();
        assert!(out.closed_laps.is_empty());
    }

    #[test]
    fn dynamic_config_round_trips_through_stats() {
        let mut w = world();
        let payload = RaceConfigPayload {
            object_collision_time: Some(7.0),
            collision_creating_time: Some(6.0),
            collision_absorbing_time: Some(3.0),
            total_laps: None,
        };
        w.admin_start(Some(1), Some(5), None, Some(&payload));
        let v: Value = serde_json::from_str(&w.stats_message(100.0)).unwrap();
        assert_eq!(v["total_laps"], 5);
        assert_eq!(v["race_config"]["wall_hit_penalty"], 7.0);
        assert_eq!(v["race_config"]["attacker_penalty"], 6.0);
        assert_eq!(v["race_config"]["victim_bonus"], 3.0);

        // Reset restores the boot defaults (two laps in this fixture)
        w.admin_reset();
        let v: Value = serde_json::from_str(&w.stats_message(101.0)).unwrap();
        assert_eq!(v["total_laps"], 2);
        assert_eq!(v["race_config"]["wall_hit_penalty"], 5.0);
        assert_eq!(v["race_config"]["victim_bonus"], 2.0);

        // Non-positive values fall back field-by-field
        let payload = RaceConfigPayload {
            object_collision_time: Some(0.0),
            ..Default::default()
        };
        w.admin_start(None, None, None, Some(&payload));
        let v: Value = serde_json::from_str(&w.stats_message(102.0)).unwrap();
        assert_eq!(v["race_config"]["wall_hit_penalty"], 5.0);
    }

    #[test]
    fn reset_is_idempotent_at_world_level() {
        let mut w = world();
        w.admin_start(Some(3), Some(4), Some(&HashMap::from([("0".to_string(), 9)])), None);
        w.process_datagram(&packet_at(0, 80.0, 50.0), 9.0);
        w.admin_reset();
        let once: Value = serde_json::from_str(&w.state_message(20.0)).unwrap();
        w.admin_reset();
        let twice: Value = serde_json::from_str(&w.state_message(20.0)).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once["race_armed"], false);
        assert!(once["group_id"].is_null());
        assert!(once["cars"].as_array().unwrap().is_empty());
    }

    #[test]
    fn connection_message_carries_track_and_anchors() {
        let w = world();
        let v: Value = serde_json::from_str(&w.connection_message(50.0)).unwrap();
        assert_eq!(v["type"], "connection");
        assert_eq!(v["status"], "connected");
        assert_eq!(v["server_info"]["tag_count"], 2);
        assert_eq!(v["anchors"]["0"]["x"], 0.0);
        assert_eq!(v["anchors"]["2"]["y"], 200.0);
        assert_eq!(v["track"]["outer_points"].as_array().unwrap().len(), 40);
        assert_eq!(v["server_info"]["uptime_seconds"], 50.0);
    }

    #[test]
    fn state_message_includes_active_cars_only() {
        let mut w = world();
        w.process_datagram(&packet_at(0, 80.0, 50.0), 10.0);
        w.process_datagram(&packet_at(1, 150.0, 150.0), 10.0);
        let v: Value = serde_json::from_str(&w.state_message(11.0)).unwrap();
        assert_eq!(v["cars"].as_array().unwrap().len(), 2);
        // Tag 1 went stale
        let v: Value = serde_json::from_str(&w.state_message(16.0)).unwrap();
        assert!(v["cars"].as_array().unwrap().is_empty());
    }
}
