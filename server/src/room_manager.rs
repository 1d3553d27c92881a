//! Room directory: creation, membership and the per-tick fan-out of snapshots

use crate::error::RoomError;
use crate::room::{Room, RoomPhase};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{ControlInput, Packet, PlayerId, RoomRules, RoomSummary, VehicleTuning};
use std::collections::HashMap;

const ROOM_ID_LENGTH: usize = 5;
const ROOM_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// What a player needs to build the room's track locally
#[derive(Debug, Clone, PartialEq)]
pub struct RoomJoin {
    pub room_id: String,
    pub seed: u32,
    pub rules: RoomRules,
    /// The room the player was in before, whose members should hear they left
    pub left: Option<RoomDeparture>,
}

/// Result of a player leaving their room
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDeparture {
    pub room_id: String,
    /// Members still in the room, to be told about the departure
    pub remaining: Vec<PlayerId>,
    pub destroyed: bool,
}

/// A packet addressed to a set of players
#[derive(Debug, Clone)]
pub struct RoomBroadcast {
    pub recipients: Vec<PlayerId>,
    pub packet: Packet,
}

/// Every room on the server and which room each player is in
pub struct RoomManager {
    rooms: HashMap<String, Room>,
    membership: HashMap<PlayerId, String>,
    rng: StdRng,
    tuning: VehicleTuning,
}

impl RoomManager {
    /// Creates a manager seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible room ids, seeds and colors
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rooms: HashMap::new(),
            membership: HashMap::new(),
            rng,
            tuning: VehicleTuning::default(),
        }
    }

    /// Returns the number of rooms, including any awaiting the next sweep
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Looks a room up by id, in any letter case
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(&normalize_room_id(room_id))
    }

    /// Id of the room `player_id` is in, if any
    pub fn room_of(&self, player_id: PlayerId) -> Option<&str> {
        self.membership.get(&player_id).map(String::as_str)
    }

    /// Opens a room with a fresh random seed and puts `host` in it. A host
    /// already in a room leaves it first; see [`RoomJoin::left`].
    pub fn create_room(&mut self, host: PlayerId, rules: RoomRules) -> RoomJoin {
        let seed = self.rng.gen::<u32>();
        self.create_room_with_seed(host, rules, seed)
    }

    /// Same as [`RoomManager::create_room`] with a caller-chosen seed
    pub fn create_room_with_seed(&mut self, host: PlayerId, rules: RoomRules, seed: u32) -> RoomJoin {
        let left = self.leave(host).ok();

        let room_id = self.unused_room_id();
        let mut room = Room::new(room_id.clone(), seed, rules, self.tuning);
        let color = random_color(&mut self.rng);
        room.add_player(host, color);

        info!("Room {} created by player {} with seed {}", room_id, host, seed);

        let join = RoomJoin {
            room_id: room_id.clone(),
            seed,
            rules: room.rules(),
            left,
        };
        self.rooms.insert(room_id.clone(), room);
        self.membership.insert(host, room_id);
        join
    }

    /// Moves `player_id` into an existing room, leaving any other room first
    pub fn join_room(&mut self, player_id: PlayerId, room_id: &str) -> Result<RoomJoin, RoomError> {
        let room_id = normalize_room_id(room_id);
        match self.rooms.get(&room_id) {
            Some(room) if room.phase() == RoomPhase::Open => {}
            _ => return Err(RoomError::RoomNotFound(room_id)),
        }

        let left = if self.room_of(player_id) != Some(room_id.as_str()) {
            self.leave(player_id).ok()
        } else {
            None
        };

        let color = random_color(&mut self.rng);
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;
        room.add_player(player_id, color);
        self.membership.insert(player_id, room_id.clone());

        Ok(RoomJoin {
            room_id,
            seed: room.seed(),
            rules: room.rules(),
            left,
        })
    }

    /// Open rooms ordered by id
    pub fn list_rooms(&mut self) -> Vec<RoomSummary> {
        self.sweep_empty();
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .values()
            .map(|room| RoomSummary {
                room_id: room.id().to_string(),
                player_count: room.player_count() as u32,
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    /// Takes `player_id` out of their room, destroying it if they were the last.
    ///
    /// Fails with `NotInRoom` if the player is not in a room.
    pub fn leave(&mut self, player_id: PlayerId) -> Result<RoomDeparture, RoomError> {
        let room_id = self
            .membership
            .remove(&player_id)
            .ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(&room_id).ok_or(RoomError::NotInRoom)?;
        room.remove_player(player_id);

        let remaining = room.player_ids();
        let destroyed = room.phase() == RoomPhase::Empty;
        if destroyed {
            self.rooms.remove(&room_id);
            info!("Room {} destroyed", room_id);
        }

        Ok(RoomDeparture {
            room_id,
            remaining,
            destroyed,
        })
    }

    /// Host-only rules change. Returns the applied rules and every member to notify.
    pub fn update_rules(
        &mut self,
        player_id: PlayerId,
        rules: RoomRules,
    ) -> Result<(RoomRules, Vec<PlayerId>), RoomError> {
        let room = self.room_mut_of(player_id)?;
        let applied = room.set_rules(player_id, rules)?;
        Ok((applied, room.player_ids()))
    }

    /// Stores controls for the next tick. Returns false for players not in a room
    /// or for stale sequence numbers.
    pub fn submit_input(&mut self, player_id: PlayerId, sequence: u32, input: ControlInput) -> bool {
        self.room_mut_of(player_id)
            .map(|room| room.submit_input(player_id, sequence, input))
            .unwrap_or(false)
    }

    /// Steps every room once and returns the snapshot each room's members should receive
    pub fn tick_all(&mut self, dt: f64) -> Vec<RoomBroadcast> {
        self.sweep_empty();

        let mut broadcasts = Vec::with_capacity(self.rooms.len());
        for room in self.rooms.values_mut() {
            room.step(dt);
            broadcasts.push(RoomBroadcast {
                recipients: room.player_ids(),
                packet: room.snapshot(),
            });
        }
        broadcasts
    }

    fn room_mut_of(&mut self, player_id: PlayerId) -> Result<&mut Room, RoomError> {
        let room_id = self.membership.get(&player_id).ok_or(RoomError::NotInRoom)?;
        self.rooms.get_mut(room_id).ok_or(RoomError::NotInRoom)
    }

    fn sweep_empty(&mut self) {
        self.rooms.retain(|id, room| {
            let keep = room.phase() == RoomPhase::Open;
            if !keep {
                info!("Room {} destroyed", id);
            }
            keep
        });
    }

    fn unused_room_id(&mut self) -> String {
        loop {
            let id: String = (0..ROOM_ID_LENGTH)
                .map(|_| ROOM_ID_ALPHABET[self.rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form of a room id: trimmed and upper-case
pub fn normalize_room_id(room_id: &str) -> String {
    room_id.trim().to_ascii_uppercase()
}

/// Random hue at fixed saturation and lightness, packed as 0xRRGGBB
fn random_color(rng: &mut impl Rng) -> u32 {
    hsl_to_rgb(rng.gen_range(0.0..360.0), 0.8, 0.5)
}

fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> u32 {
    let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let sector = (hue.rem_euclid(360.0)) / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = lightness - chroma / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u32;
    (channel(r) << 16) | (channel(g) << 8) | channel(b)
}

/// Unit tests for room creation, joining, leaving and the per-tick fan-out
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_format() {
        let mut manager = RoomManager::seeded(1);
        for player in 0..50 {
            let join = manager.create_room(player, RoomRules::default());
            assert_eq!(join.room_id.len(), ROOM_ID_LENGTH);
            assert!(join
                .room_id
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
        assert_eq!(manager.len(), 50);
    }

    #[test]
    fn test_create_and_join() {
        let mut manager = RoomManager::seeded(2);
        let created = manager.create_room(1, RoomRules::default());
        let joined = manager.join_room(2, &created.room_id).unwrap();

        assert_eq!(joined.seed, created.seed);
        assert_eq!(joined.room_id, created.room_id);
        assert_eq!(manager.room_of(1), Some(created.room_id.as_str()));
        assert_eq!(manager.room_of(2), Some(created.room_id.as_str()));
        assert_eq!(manager.room(&created.room_id).unwrap().player_count(), 2);
    }

    #[test]
    fn test_join_is_case_insensitive() {
        let mut manager = RoomManager::seeded(3);
        let created = manager.create_room(1, RoomRules::default());
        let lower = created.room_id.to_lowercase();
        assert!(manager.join_room(2, &format!(" {} ", lower)).is_ok());
    }

    #[test]
    fn test_join_unknown_room() {
        let mut manager = RoomManager::seeded(4);
        let created = manager.create_room(1, RoomRules::default());

        let result = manager.join_room(1, "ZZZZZ");
        assert_eq!(result, Err(RoomError::RoomNotFound("ZZZZZ".to_string())));
        // A failed join leaves the player where they were.
        assert_eq!(manager.room_of(1), Some(created.room_id.as_str()));
    }

    #[test]
    fn test_last_leave_destroys_room() {
        let mut manager = RoomManager::seeded(5);
        let created = manager.create_room_with_seed(1, RoomRules::default(), 42);
        assert_eq!(created.seed, 42);

        let departure = manager.leave(1).unwrap();
        assert!(departure.destroyed);
        assert!(departure.remaining.is_empty());
        assert!(manager.is_empty());

        assert_eq!(
            manager.join_room(2, &created.room_id),
            Err(RoomError::RoomNotFound(created.room_id.clone()))
        );
    }

    #[test]
    fn test_leave_reports_remaining_members() {
        let mut manager = RoomManager::seeded(6);
        let created = manager.create_room(1, RoomRules::default());
        manager.join_room(2, &created.room_id).unwrap();
        manager.join_room(3, &created.room_id).unwrap();

        let departure = manager.leave(1).unwrap();
        assert!(!departure.destroyed);
        assert_eq!(departure.remaining, vec![2, 3]);
        assert_eq!(manager.room(&created.room_id).unwrap().host(), Some(2));
        assert_eq!(manager.leave(1), Err(RoomError::NotInRoom));
    }

    #[test]
    fn test_joining_another_room_leaves_the_first() {
        let mut manager = RoomManager::seeded(7);
        let first = manager.create_room(1, RoomRules::default());
        let second = manager.create_room(2, RoomRules::default());

        manager.join_room(1, &second.room_id).unwrap();
        assert!(manager.room(&first.room_id).is_none());
        assert_eq!(manager.room(&second.room_id).unwrap().player_count(), 2);
    }

    #[test]
    fn test_switching_rooms_reports_departure() {
        let mut manager = RoomManager::seeded(12);
        let first = manager.create_room(1, RoomRules::default());
        manager.join_room(3, &first.room_id).unwrap();
        assert_eq!(first.left, None);

        let second = manager.create_room(2, RoomRules::default());
        let joined = manager.join_room(1, &second.room_id).unwrap();
        assert_eq!(
            joined.left,
            Some(RoomDeparture {
                room_id: first.room_id.clone(),
                remaining: vec![3],
                destroyed: false,
            })
        );

        let rejoined = manager.join_room(1, &second.room_id).unwrap();
        assert_eq!(rejoined.left, None);

        let created = manager.create_room(3, RoomRules::default());
        let departure = created.left.unwrap();
        assert_eq!(departure.room_id, first.room_id);
        assert!(departure.destroyed);
        assert!(departure.remaining.is_empty());
    }

    #[test]
    fn test_list_rooms_sorted() {
        let mut manager = RoomManager::seeded(8);
        let a = manager.create_room(1, RoomRules::default());
        let b = manager.create_room(2, RoomRules::default());
        manager.join_room(3, &b.room_id).unwrap();

        let rooms = manager.list_rooms();
        assert_eq!(rooms.len(), 2);
        assert!(rooms[0].room_id < rooms[1].room_id);
        let count_of = |id: &str| {
            rooms
                .iter()
                .find(|r| r.room_id == id)
                .map(|r| r.player_count)
        };
        assert_eq!(count_of(&a.room_id), Some(1));
        assert_eq!(count_of(&b.room_id), Some(2));
    }

    #[test]
    fn test_update_rules_host_only() {
        let mut manager = RoomManager::seeded(9);
        let created = manager.create_room(1, RoomRules::default());
        manager.join_room(2, &created.room_id).unwrap();

        let faster = RoomRules {
            max_speed: 800.0,
            accel: 80.0,
        };
        assert_eq!(manager.update_rules(2, faster), Err(RoomError::NotHost));
        assert_eq!(manager.update_rules(5, faster), Err(RoomError::NotInRoom));

        let (applied, members) = manager.update_rules(1, faster).unwrap();
        assert_eq!(applied, faster);
        assert_eq!(members, vec![1, 2]);
    }

    #[test]
    fn test_tick_all_addresses_members() {
        let mut manager = RoomManager::seeded(10);
        let a = manager.create_room(1, RoomRules::default());
        manager.join_room(2, &a.room_id).unwrap();
        manager.create_room(3, RoomRules::default());

        assert!(manager.submit_input(
            1,
            1,
            ControlInput {
                steer: 0.0,
                gas: true,
                brake: false
            }
        ));
        assert!(!manager.submit_input(99, 1, ControlInput::default()));

        let broadcasts = manager.tick_all(1.0 / 60.0);
        assert_eq!(broadcasts.len(), 2);
        let total: usize = broadcasts.iter().map(|b| b.recipients.len()).sum();
        assert_eq!(total, 3);
        for broadcast in broadcasts {
            match broadcast.packet {
                Packet::Snapshot { tick, players, .. } => {
                    assert_eq!(tick, 1);
                    assert_eq!(players.len(), broadcast.recipients.len());
                }
                _ => panic!("Wrong packet type"),
            }
        }
    }

    #[test]
    fn test_seeded_manager_is_reproducible() {
        let mut a = RoomManager::seeded(11);
        let mut b = RoomManager::seeded(11);
        assert_eq!(
            a.create_room(1, RoomRules::default()),
            b.create_room(1, RoomRules::default())
        );
    }

    #[test]
    fn test_hsl_primaries() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), 0xff0000);
        assert_eq!(hsl_to_rgb(120.0, 1.0, 0.5), 0x00ff00);
        assert_eq!(hsl_to_rgb(240.0, 1.0, 0.5), 0x0000ff);
        assert_eq!(hsl_to_rgb(60.0, 0.0, 1.0), 0xffffff);
    }
}
