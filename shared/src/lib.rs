pub mod noise;
pub mod random;
pub mod track;
pub mod vehicle;
pub mod window;

pub use random::SeededRandom;
pub use track::{Chunk, TrackFrame, TrackGenerator};
pub use vehicle::{VehicleSimulator, VehicleState, VehicleTuning, WALL_LIMIT};
pub use window::{ChunkWindow, TrackError, TrackQuery, WindowConfig};

use serde::{Deserialize, Serialize};

/// One km/h expressed in world units per second
pub const UNITS_PER_KMH: f64 = 0.27;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const PROTOCOL_VERSION: u32 = 1;
/// Largest UDP payload; receive buffers are this big so a crowded snapshot is never truncated
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

pub const MIN_MAX_SPEED: f64 = 50.0;
pub const MAX_MAX_SPEED: f64 = 1000.0;
pub const MIN_ACCEL: f64 = 5.0;
pub const MAX_ACCEL: f64 = 200.0;

pub type PlayerId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    CreateRoom {
        request_id: u32,
        rules: RoomRules,
    },
    JoinRoom {
        request_id: u32,
        room_id: String,
    },
    ListRooms {
        request_id: u32,
    },
    LeaveRoom {
        request_id: u32,
    },
    UpdateRules {
        request_id: u32,
        rules: RoomRules,
    },
    Input {
        sequence: u32,
        steer: f32,
        gas: bool,
        brake: bool,
    },
    Disconnect,

    Connected {
        client_id: PlayerId,
    },
    RoomCreated {
        request_id: u32,
        room_id: String,
        seed: u32,
    },
    RoomJoined {
        request_id: u32,
        room_id: String,
        seed: u32,
        rules: RoomRules,
    },
    RoomList {
        request_id: u32,
        rooms: Vec<RoomSummary>,
    },
    RoomLeft {
        request_id: u32,
    },
    RulesUpdated {
        request_id: u32,
        rules: RoomRules,
    },
    RequestFailed {
        request_id: u32,
        error: String,
    },
    RulesChanged {
        rules: RoomRules,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    Snapshot {
        tick: u64,
        rules: RoomRules,
        players: Vec<PlayerSnapshot>,
    },
    Disconnected {
        reason: String,
    },
}

impl Packet {
    /// Request id of a reliable room-management message, either direction
    pub fn request_id(&self) -> Option<u32> {
        match self {
            Packet::CreateRoom { request_id, .. }
            | Packet::JoinRoom { request_id, .. }
            | Packet::ListRooms { request_id }
            | Packet::LeaveRoom { request_id }
            | Packet::UpdateRules { request_id, .. }
            | Packet::RoomCreated { request_id, .. }
            | Packet::RoomJoined { request_id, .. }
            | Packet::RoomList { request_id, .. }
            | Packet::RoomLeft { request_id }
            | Packet::RulesUpdated { request_id, .. }
            | Packet::RequestFailed { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

/// Per-tick driver controls
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    pub steer: f32,
    pub gas: bool,
    pub brake: bool,
}

impl ControlInput {
    /// Steer clamped to `[-1, 1]`, non-finite steer treated as centered
    pub fn sanitized(&self) -> Self {
        let steer = if self.steer.is_finite() {
            self.steer.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self { steer, ..*self }
    }
}

/// Room-wide driving rules, chosen by the host
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct RoomRules {
    /// Top speed in km/h
    pub max_speed: f64,
    /// Acceleration in km/h per second
    pub accel: f64,
}

impl Default for RoomRules {
    fn default() -> Self {
        Self {
            max_speed: 500.0,
            accel: 40.0,
        }
    }
}

impl RoomRules {
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let max_speed = if self.max_speed.is_finite() {
            self.max_speed.clamp(MIN_MAX_SPEED, MAX_MAX_SPEED)
        } else {
            defaults.max_speed
        };
        let accel = if self.accel.is_finite() {
            self.accel.clamp(MIN_ACCEL, MAX_ACCEL)
        } else {
            defaults.accel
        };
        Self { max_speed, accel }
    }

    pub fn max_speed_units(&self) -> f64 {
        self.max_speed * UNITS_PER_KMH
    }

    pub fn accel_units(&self) -> f64 {
        self.accel * UNITS_PER_KMH
    }
}

/// Compact per-player entry of a snapshot
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    /// Track distance
    pub dist: f64,
    /// Lateral offset
    pub lat: f32,
    pub heading: f32,
    /// km/h
    pub speed: f32,
    /// 0xRRGGBB
    pub color: u32,
}

impl PlayerSnapshot {
    pub fn from_state(id: PlayerId, state: &VehicleState, color: u32) -> Self {
        Self {
            id,
            dist: state.track_distance,
            lat: state.lateral_offset as f32,
            heading: state.heading as f32,
            speed: state.speed_kmh() as f32,
            color,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub player_count: u32,
}
