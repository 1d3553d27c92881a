//! Vehicle motion in track coordinates
//!
//! A vehicle is described by its distance along the centerline and a signed
//! lateral offset from it, plus a world-frame heading and a scalar speed.
//! Each step integrates speed, turns the heading, projects the world-space
//! displacement onto the local track frame and finally resolves contact with
//! the walls on either side of the road.

use crate::track::heading_direction;
use crate::window::TrackQuery;
use crate::{ControlInput, RoomRules};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Half the drivable road width in world units
pub const ROAD_HALF_WIDTH: f64 = 8.5;
pub const CAR_HALF_WIDTH: f64 = 1.0;
const WALL_MARGIN: f64 = 0.2;
/// Largest lateral offset a vehicle may hold
pub const WALL_LIMIT: f64 = ROAD_HALF_WIDTH - CAR_HALF_WIDTH - WALL_MARGIN;

/// Friction factors are expressed per tick of this rate
const REFERENCE_TICK_RATE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    /// World units per second, never negative
    pub speed: f64,
    /// World yaw in radians, measured from +Z toward +X
    pub heading: f64,
    pub lateral_offset: f64,
    pub track_distance: f64,
}

impl VehicleState {
    /// Stationary vehicle on the centerline at `distance`, facing `heading`
    pub fn at(distance: f64, heading: f64) -> Self {
        Self {
            speed: 0.0,
            heading,
            lateral_offset: 0.0,
            track_distance: distance,
        }
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed / crate::UNITS_PER_KMH
    }
}

/// Handling constants. None of these are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleTuning {
    /// Multiplier applied to speed per 60 Hz tick while coasting
    pub friction_per_tick: f64,
    /// Turn rate in rad/s at standstill with full steer
    pub base_steer_rate: f64,
    /// How quickly steering authority falls off with speed
    pub steer_stiffness: f64,
    pub wall_limit: f64,
    /// Speed multiplier on wall contact
    pub speed_damping: f64,
    /// Fraction of the heading error relative to the road removed on contact
    pub heading_correction: f64,
    /// Braking decelerates this many times faster than the rules' acceleration
    pub brake_factor: f64,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            friction_per_tick: 0.99,
            base_steer_rate: 3.0,
            steer_stiffness: 0.035,
            wall_limit: WALL_LIMIT,
            speed_damping: 0.8,
            heading_correction: 0.5,
            brake_factor: 2.0,
        }
    }
}

/// Pure stepping function shared by the server tick and any client-side prediction
#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleSimulator {
    tuning: VehicleTuning,
}

impl VehicleSimulator {
    pub fn new(tuning: VehicleTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &VehicleTuning {
        &self.tuning
    }

    /// Advances `state` by `dt` seconds under `input`.
    ///
    /// If the track cannot be located at the vehicle's distance the vehicle
    /// keeps its position for this step; speed and heading still update.
    pub fn step<Q: TrackQuery + ?Sized>(
        &self,
        state: &VehicleState,
        input: &ControlInput,
        rules: &RoomRules,
        dt: f64,
        track: &Q,
    ) -> VehicleState {
        let input = input.sanitized();
        let mut next = *state;

        next.speed = self.update_speed(state.speed, &input, rules, dt);
        next.heading += input.steer as f64 * self.turn_rate(next.speed) * dt;

        match track.locate(state.track_distance) {
            Ok(frame) => {
                let displacement = heading_direction(next.heading) * (next.speed * dt);
                next.track_distance += displacement.dot(frame.tangent).max(0.0);
                next.lateral_offset += displacement.dot(frame.right);

                if next.lateral_offset.abs() > self.tuning.wall_limit {
                    self.resolve_wall(&mut next, frame.road_heading);
                }
            }
            Err(_) => {
                // No frame to resolve against; still never leave the road.
                next.lateral_offset = next
                    .lateral_offset
                    .clamp(-self.tuning.wall_limit, self.tuning.wall_limit);
            }
        }

        next.heading = wrap_angle(next.heading);
        next
    }

    /// Speed after one step of gas, brake or coasting, in world units per second
    pub fn update_speed(&self, speed: f64, input: &ControlInput, rules: &RoomRules, dt: f64) -> f64 {
        let max = rules.max_speed_units();
        let accel = rules.accel_units();

        let speed = if input.gas {
            if speed < max {
                (speed + accel * dt).min(max)
            } else {
                max
            }
        } else if input.brake {
            speed - self.tuning.brake_factor * accel * dt
        } else {
            speed * self.tuning.friction_per_tick.powf(dt * REFERENCE_TICK_RATE)
        };

        // Rules can drop mid-race, so the cap applies whatever the pedals do.
        speed.min(max).max(0.0)
    }

    /// Steering authority in rad/s at `speed`
    pub fn turn_rate(&self, speed: f64) -> f64 {
        self.tuning.base_steer_rate / (1.0 + speed * self.tuning.steer_stiffness)
    }

    fn resolve_wall(&self, state: &mut VehicleState, road_heading: f64) {
        state.lateral_offset = state.lateral_offset.signum() * self.tuning.wall_limit;
        state.speed *= self.tuning.speed_damping;

        let error = wrap_angle(state.heading - road_heading);
        state.heading = road_heading + error * (1.0 - self.tuning.heading_correction);
    }
}

/// Wraps an angle into `(-PI, PI]`
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}
