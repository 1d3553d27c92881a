//! Turns authoritative snapshots into smoothly moving, displayable vehicles
//!
//! The client never simulates other players. Each snapshot sets a target per
//! vehicle and every frame the displayed values move a fixed fraction of the
//! way toward it. Track geometry comes from a local chunk window built from
//! the room seed, which produces exactly the server's track.

use crate::rendering::VehiclePose;
use log::debug;
use shared::vehicle::wrap_angle;
use shared::{ChunkWindow, PlayerId, PlayerSnapshot, RoomRules, TrackQuery};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerConfig {
    /// Fraction of the remaining gap closed per frame
    pub blend: f64,
    /// Gaps larger than this along the track are jumped instead of blended
    pub snap_distance: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            blend: 0.3,
            snap_distance: 50.0,
        }
    }
}

/// A remote or local vehicle as currently shown
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedVehicle {
    pub id: PlayerId,
    pub distance: f64,
    pub lateral: f64,
    pub heading: f64,
    pub speed_kmh: f64,
    pub color: u32,
    target: PlayerSnapshot,
}

impl DisplayedVehicle {
    fn from_snapshot(snapshot: PlayerSnapshot) -> Self {
        Self {
            id: snapshot.id,
            distance: snapshot.dist,
            lateral: snapshot.lat as f64,
            heading: snapshot.heading as f64,
            speed_kmh: snapshot.speed as f64,
            color: snapshot.color,
            target: snapshot,
        }
    }

    /// Latest authoritative state this vehicle is moving toward
    pub fn target(&self) -> &PlayerSnapshot {
        &self.target
    }

    fn blend_toward_target(&mut self, config: &ReconcilerConfig) {
        let target = &self.target;
        if (target.dist - self.distance).abs() > config.snap_distance {
            *self = Self::from_snapshot(target.clone());
            return;
        }

        self.distance += (target.dist - self.distance) * config.blend;
        self.lateral += (target.lat as f64 - self.lateral) * config.blend;
        self.heading =
            wrap_angle(self.heading + wrap_angle(target.heading as f64 - self.heading) * config.blend);
        self.speed_kmh += (target.speed as f64 - self.speed_kmh) * config.blend;
        self.color = target.color;
    }
}

/// Client-side view of one room, never authoritative
pub struct ClientReconciler {
    config: ReconcilerConfig,
    window: Option<ChunkWindow>,
    rules: RoomRules,
    local_id: Option<PlayerId>,
    last_tick: Option<u64>,
    vehicles: BTreeMap<PlayerId, DisplayedVehicle>,
}

impl ClientReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            window: None,
            rules: RoomRules::default(),
            local_id: None,
            last_tick: None,
            vehicles: BTreeMap::new(),
        }
    }

    /// Marks which vehicle is ours so poses can flag it
    pub fn set_local_player(&mut self, player_id: PlayerId) {
        self.local_id = Some(player_id);
    }

    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_id
    }

    /// Starts showing a room: rebuilds the track from its seed and forgets old vehicles
    pub fn enter_room(&mut self, seed: u32, rules: RoomRules) {
        self.window = Some(ChunkWindow::new(seed));
        self.rules = rules;
        self.last_tick = None;
        self.vehicles.clear();
    }

    /// Drops the track and every vehicle
    pub fn leave_room(&mut self) {
        self.window = None;
        self.last_tick = None;
        self.vehicles.clear();
    }

    pub fn in_room(&self) -> bool {
        self.window.is_some()
    }

    pub fn window(&self) -> Option<&ChunkWindow> {
        self.window.as_ref()
    }

    pub fn rules(&self) -> RoomRules {
        self.rules
    }

    pub fn set_rules(&mut self, rules: RoomRules) {
        self.rules = rules;
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    pub fn vehicle(&self, player_id: PlayerId) -> Option<&DisplayedVehicle> {
        self.vehicles.get(&player_id)
    }

    pub fn local_vehicle(&self) -> Option<&DisplayedVehicle> {
        self.local_id.and_then(|id| self.vehicles.get(&id))
    }

    /// Number of vehicles currently displayed
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Accepts a snapshot unless it is older than one already applied.
    /// Returns whether it was applied.
    pub fn apply_snapshot(&mut self, tick: u64, rules: RoomRules, players: Vec<PlayerSnapshot>) -> bool {
        if self.window.is_none() {
            return false;
        }
        if matches!(self.last_tick, Some(last) if tick <= last) {
            debug!("Dropping out-of-order snapshot {} (have {:?})", tick, self.last_tick);
            return false;
        }

        self.last_tick = Some(tick);
        self.rules = rules;

        self.vehicles
            .retain(|id, _| players.iter().any(|p| p.id == *id));
        for snapshot in players {
            match self.vehicles.get_mut(&snapshot.id) {
                Some(vehicle) => vehicle.target = snapshot,
                None => {
                    self.vehicles
                        .insert(snapshot.id, DisplayedVehicle::from_snapshot(snapshot));
                }
            }
        }

        self.maintain_window();
        true
    }

    /// Stops showing a player who left, without waiting for the next snapshot
    pub fn remove_player(&mut self, player_id: PlayerId) {
        self.vehicles.remove(&player_id);
    }

    /// Moves every displayed vehicle one frame toward its target
    pub fn advance(&mut self) {
        for vehicle in self.vehicles.values_mut() {
            vehicle.blend_toward_target(&self.config);
        }
        self.maintain_window();
    }

    /// World-space poses for the renderer. Vehicles whose track is not
    /// generated yet are left out for this frame.
    pub fn poses(&self) -> Vec<VehiclePose> {
        let Some(window) = &self.window else {
            return Vec::new();
        };

        self.vehicles
            .values()
            .filter_map(|vehicle| {
                let frame = window.locate(vehicle.distance).ok()?;
                Some(VehiclePose {
                    player_id: vehicle.id,
                    position: frame.position + frame.right * vehicle.lateral,
                    heading: vehicle.heading,
                    speed_kmh: vehicle.speed_kmh,
                    color: vehicle.color,
                    is_local: Some(vehicle.id) == self.local_id,
                })
            })
            .collect()
    }

    fn maintain_window(&mut self) {
        let Some(window) = self.window.as_mut() else {
            return;
        };

        let mut span: Option<(f64, f64)> = None;
        for vehicle in self.vehicles.values() {
            for d in [vehicle.distance, vehicle.target.dist] {
                span = Some(match span {
                    Some((lo, hi)) => (lo.min(d), hi.max(d)),
                    None => (d, d),
                });
            }
        }

        if let Some((slowest, fastest)) = span {
            window.maintain(slowest, fastest);
        }
    }
}

impl Default for ClientReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn snapshot(id: PlayerId, dist: f64, lat: f32) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            dist,
            lat,
            heading: 0.0,
            speed: 100.0,
            color: 0xabcdef,
        }
    }

    fn reconciler_in_room() -> ClientReconciler {
        let mut reconciler = ClientReconciler::default();
        reconciler.enter_room(1234, RoomRules::default());
        reconciler.set_local_player(1);
        reconciler
    }

    #[test]
    fn test_snapshot_ignored_outside_room() {
        let mut reconciler = ClientReconciler::default();
        assert!(!reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(1, 0.0, 0.0)]));
        assert_eq!(reconciler.vehicle_count(), 0);
    }

    #[test]
    fn test_new_vehicle_appears_at_target() {
        let mut reconciler = reconciler_in_room();
        assert!(reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(2, 30.0, 1.5)]));

        let vehicle = reconciler.vehicle(2).unwrap();
        assert_eq!(vehicle.distance, 30.0);
        assert_eq!(vehicle.lateral, 1.5);
    }

    #[test]
    fn test_blend_moves_fraction_of_gap() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(1, 10.0, 0.0)]);
        reconciler.apply_snapshot(2, RoomRules::default(), vec![snapshot(1, 20.0, 2.0)]);

        reconciler.advance();
        let vehicle = reconciler.local_vehicle().unwrap();
        assert_approx_eq!(vehicle.distance, 13.0, 1e-9);
        assert_approx_eq!(vehicle.lateral, 0.6, 1e-6);

        for _ in 0..60 {
            reconciler.advance();
        }
        assert_approx_eq!(reconciler.local_vehicle().unwrap().distance, 20.0, 1e-6);
    }

    #[test]
    fn test_large_gap_snaps() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(1, 0.0, 0.0)]);
        reconciler.apply_snapshot(2, RoomRules::default(), vec![snapshot(1, 500.0, 0.0)]);
        reconciler.advance();
        assert_eq!(reconciler.local_vehicle().unwrap().distance, 500.0);
    }

    #[test]
    fn test_out_of_order_snapshot_rejected() {
        let mut reconciler = reconciler_in_room();
        assert!(reconciler.apply_snapshot(5, RoomRules::default(), vec![snapshot(1, 40.0, 0.0)]));
        assert!(!reconciler.apply_snapshot(4, RoomRules::default(), vec![snapshot(1, 10.0, 0.0)]));
        assert!(!reconciler.apply_snapshot(5, RoomRules::default(), vec![snapshot(1, 10.0, 0.0)]));
        assert_eq!(reconciler.local_vehicle().unwrap().target().dist, 40.0);
        assert_eq!(reconciler.last_tick(), Some(5));
    }

    #[test]
    fn test_missing_players_are_dropped() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(
            1,
            RoomRules::default(),
            vec![snapshot(1, 0.0, 0.0), snapshot(2, 0.0, 0.0)],
        );
        reconciler.apply_snapshot(2, RoomRules::default(), vec![snapshot(1, 1.0, 0.0)]);
        assert_eq!(reconciler.vehicle_count(), 1);
        assert!(reconciler.vehicle(2).is_none());
    }

    #[test]
    fn test_poses_follow_track() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(
            1,
            RoomRules::default(),
            vec![snapshot(1, 100.0, 2.0), snapshot(2, 100.0, 0.0)],
        );

        let poses = reconciler.poses();
        assert_eq!(poses.len(), 2);

        let frame = reconciler.window().unwrap().locate(100.0).unwrap();
        let local = poses.iter().find(|p| p.is_local).unwrap();
        let other = poses.iter().find(|p| !p.is_local).unwrap();
        assert!(local.position.distance(frame.position + frame.right * 2.0) < 1e-9);
        assert!(other.position.distance(frame.position) < 1e-9);
        assert_eq!(local.color, 0xabcdef);
    }

    #[test]
    fn test_window_follows_far_vehicles() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(1, 9000.0, 0.0)]);
        assert!(reconciler.window().unwrap().contains(9000.0));
        assert_eq!(reconciler.poses().len(), 1);
    }

    #[test]
    fn test_enter_room_resets_tick_order() {
        let mut reconciler = reconciler_in_room();
        reconciler.apply_snapshot(100, RoomRules::default(), vec![snapshot(1, 0.0, 0.0)]);
        reconciler.enter_room(77, RoomRules::default());
        assert_eq!(reconciler.vehicle_count(), 0);
        assert!(reconciler.apply_snapshot(1, RoomRules::default(), vec![snapshot(1, 0.0, 0.0)]));
    }
}
