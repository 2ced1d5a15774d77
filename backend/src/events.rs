//! # events
//!
//! Game events emitted by the lap and collision engines. These serialize
//! directly into the `game_events` array of `tag_position` messages and
//! trigger a full `state_update` broadcast for the frame that produced them.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WallSide {
    Outer,
    Inner,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// First accepted crossing after arming: lap 1 opens.
    RaceStart {
        tag_id: usize,
        name: String,
        lap: u32,
        time: f64,
    },
    /// A lap closed and the next one opened. `elp` is None for voided laps.
    LapDone {
        tag_id: usize,
        name: String,
        lap: u32,
        raw_time: f64,
        elp: Option<f64>,
        time: f64,
    },
    /// The close that completed the configured lap count.
    RaceFinish {
        tag_id: usize,
        name: String,
        lap: u32,
        raw_time: f64,
        elp: Option<f64>,
        time: f64,
    },
    /// Car-to-car contact after attacker arbitration.
    Car {
        attacker: usize,
        victim: usize,
        attacker_name: String,
        victim_name: String,
        dist: f64,
        lap: u32,
        time: f64,
    },
    /// Wall proximity on the outer or inner boundary.
    Wall {
        tag_id: usize,
        name: String,
        wall: WallSide,
        lap: u32,
        time: f64,
    },
}
