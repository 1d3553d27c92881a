//! A single race session: its track, its players and their authoritative state

use crate::error::RoomError;
use log::{debug, info};
use shared::{
    ChunkWindow, ControlInput, Packet, PlayerId, PlayerSnapshot, RoomRules, TrackQuery,
    VehicleSimulator, VehicleState, VehicleTuning,
};
use std::collections::BTreeMap;

/// One participant's authoritative record
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub state: VehicleState,
    /// Latest accepted controls, applied on every tick until replaced
    pub input: ControlInput,
    pub last_sequence: Option<u32>,
    pub color: u32,
    join_order: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Open,
    /// No players left; the owner destroys the room
    Empty,
}

/// A running race: one seed, one rules set and every player's authoritative state.
///
/// The room owns its chunk window exclusively; nothing outside its tick
/// mutates vehicle state.
pub struct Room {
    id: String,
    seed: u32,
    rules: RoomRules,
    host: Option<PlayerId>,
    players: BTreeMap<PlayerId, Player>,
    window: ChunkWindow,
    simulator: VehicleSimulator,
    tick: u64,
    joins: u64,
}

impl Room {
    /// Creates an empty room. Rules are sanitized before use.
    pub fn new(id: String, seed: u32, rules: RoomRules, tuning: VehicleTuning) -> Self {
        Self {
            id,
            seed,
            rules: rules.sanitized(),
            host: None,
            players: BTreeMap::new(),
            window: ChunkWindow::new(seed),
            simulator: VehicleSimulator::new(tuning),
            tick: 0,
            joins: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Seed every participant builds the track from
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Rules currently applied to every vehicle
    pub fn rules(&self) -> RoomRules {
        self.rules
    }

    /// The only player allowed to change the rules
    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    /// Number of steps taken so far
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Track currently streamed around the players
    pub fn window(&self) -> &ChunkWindow {
        &self.window
    }

    /// Open while anyone is in the room
    pub fn phase(&self) -> RoomPhase {
        if self.players.is_empty() {
            RoomPhase::Empty
        } else {
            RoomPhase::Open
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns true if `player_id` is in this room
    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.players.contains_key(&player_id)
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    /// Member ids in ascending order, the recipients of every broadcast
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Places a new vehicle at the rear of the held track: the start line in a
    /// fresh room, the oldest chunk still streamed in a race already under way.
    /// Returns false if already present.
    pub fn add_player(&mut self, player_id: PlayerId, color: u32) -> bool {
        if self.players.contains_key(&player_id) {
            return false;
        }

        // Chunk 0 may already be evicted, so start on the rearmost chunk still held.
        let start = self.window.min_distance();
        let start_heading = self
            .window
            .locate(start)
            .map(|frame| frame.road_heading)
            .unwrap_or(0.0);

        self.joins += 1;
        self.players.insert(
            player_id,
            Player {
                id: player_id,
                state: VehicleState::at(start, start_heading),
                input: ControlInput::default(),
                last_sequence: None,
                color,
                join_order: self.joins,
            },
        );

        if self.host.is_none() {
            self.host = Some(player_id);
        }

        info!("Player {} joined room {}", player_id, self.id);
        true
    }

    /// Removes a player; the longest-standing remaining member inherits host
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        if self.players.remove(&player_id).is_none() {
            return false;
        }

        if self.host == Some(player_id) {
            self.host = self
                .players
                .values()
                .min_by_key(|p| p.join_order)
                .map(|p| p.id);
            if let Some(new_host) = self.host {
                info!("Player {} is now host of room {}", new_host, self.id);
            }
        }

        info!("Player {} left room {}", player_id, self.id);
        true
    }

    /// Stores the newest controls for a player. Older or repeated sequence
    /// numbers are ignored. Returns whether the input was accepted.
    pub fn submit_input(&mut self, player_id: PlayerId, sequence: u32, input: ControlInput) -> bool {
        let Some(player) = self.players.get_mut(&player_id) else {
            return false;
        };

        if matches!(player.last_sequence, Some(last) if sequence <= last) {
            return false;
        }

        player.last_sequence = Some(sequence);
        player.input = input.sanitized();
        true
    }

    /// Replaces the rules on behalf of `by`.
    ///
    /// Fails with `NotInRoom` for outsiders and `NotHost` for anyone but the host.
    /// Returns the sanitized rules actually applied.
    pub fn set_rules(&mut self, by: PlayerId, rules: RoomRules) -> Result<RoomRules, RoomError> {
        if !self.players.contains_key(&by) {
            return Err(RoomError::NotInRoom);
        }
        if self.host != Some(by) {
            return Err(RoomError::NotHost);
        }

        self.rules = rules.sanitized();
        info!(
            "Room {} rules now {:.0} km/h max, {:.0} km/h/s",
            self.id, self.rules.max_speed, self.rules.accel
        );
        Ok(self.rules)
    }

    /// Advances every vehicle by `dt` seconds and keeps the track streamed around them
    pub fn step(&mut self, dt: f64) {
        for player in self.players.values_mut() {
            player.state =
                self.simulator
                    .step(&player.state, &player.input, &self.rules, dt, &self.window);
        }

        if let Some((slowest, fastest)) = self.distance_span() {
            self.window.maintain(slowest, fastest);
        }

        self.tick += 1;
        if self.tick % 600 == 0 {
            debug!(
                "Room {} tick {}: {} players, {} chunks held",
                self.id,
                self.tick,
                self.players.len(),
                self.window.len()
            );
        }
    }

    /// Compact state of every player, sent to all members after each step
    pub fn snapshot(&self) -> Packet {
        Packet::Snapshot {
            tick: self.tick,
            rules: self.rules,
            players: self
                .players
                .values()
                .map(|p| PlayerSnapshot::from_state(p.id, &p.state, p.color))
                .collect(),
        }
    }

    fn distance_span(&self) -> Option<(f64, f64)> {
        let mut distances = self.players.values().map(|p| p.state.track_distance);
        let first = distances.next()?;
        Some(distances.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }
}
