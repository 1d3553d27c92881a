//! Boundary to whatever draws the world
//!
//! This crate stops at poses. A renderer implements [`PoseSink`] and gets
//! every vehicle's world-space pose once per frame; for the road itself it
//! can query the client's chunk window through `TrackQuery::locate`.

use glam::DVec3;
use log::info;
use shared::PlayerId;

#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePose {
    pub player_id: PlayerId,
    pub position: DVec3,
    /// World yaw, measured from +Z toward +X
    pub heading: f64,
    pub speed_kmh: f64,
    /// 0xRRGGBB
    pub color: u32,
    pub is_local: bool,
}

/// Receives every displayed vehicle once per frame
pub trait PoseSink {
    fn present(&mut self, poses: &[VehiclePose]);
}

/// Logs the local vehicle every `every` frames
pub struct LogSink {
    every: u64,
    frames: u64,
}

impl LogSink {
    /// Logs on every `every`th frame; zero is treated as one
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn should_log(&self) -> bool {
        self.frames % self.every == 0
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(60)
    }
}

impl PoseSink for LogSink {
    fn present(&mut self, poses: &[VehiclePose]) {
        self.frames += 1;
        if !self.should_log() {
            return;
        }

        if let Some(local) = poses.iter().find(|p| p.is_local) {
            info!(
                "Car {} at ({:.1}, {:.1}, {:.1}) heading {:.2} rad, {:.0} km/h, {} vehicles in view",
                local.player_id,
                local.position.x,
                local.position.y,
                local.position.z,
                local.heading,
                local.speed_kmh,
                poses.len()
            );
        }
    }
}
