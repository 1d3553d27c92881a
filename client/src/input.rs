//! Client input: sequencing, change detection and a simple driver

use shared::vehicle::wrap_angle;
use shared::ControlInput;
use std::time::{Duration, Instant};

/// Inputs are resent at least this often even when unchanged
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringConfig {
    /// Multiplier on raw steer before it is sent
    pub sensitivity: f32,
    pub invert: bool,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.6,
            invert: false,
        }
    }
}

/// Numbers outgoing inputs and decides when they need sending
pub struct InputManager {
    next_sequence: u32,
    current_input: ControlInput,
    last_input_sent: Option<Instant>,
    steering: SteeringConfig,
}

impl InputManager {
    /// Creates a manager whose first update is sequence 1
    pub fn new(steering: SteeringConfig) -> Self {
        Self {
            next_sequence: 1,
            current_input: ControlInput::default(),
            last_input_sent: None,
            steering,
        }
    }

    /// Applies steering preferences to a raw reading and returns the
    /// sequenced input if it changed or the keepalive is due.
    pub fn update(&mut self, raw: ControlInput) -> Option<(u32, ControlInput)> {
        self.update_at(raw, Instant::now())
    }

    fn update_at(&mut self, raw: ControlInput, now: Instant) -> Option<(u32, ControlInput)> {
        let input = self.shape(raw);

        let changed = input != self.current_input;
        let keepalive_due = self
            .last_input_sent
            .map_or(true, |sent| now.duration_since(sent) >= KEEPALIVE_INTERVAL);

        if !changed && !keepalive_due {
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.current_input = input;
        self.last_input_sent = Some(now);
        Some((sequence, input))
    }

    pub fn current_input(&self) -> &ControlInput {
        &self.current_input
    }

    fn shape(&self, raw: ControlInput) -> ControlInput {
        let mut steer = raw.steer * self.steering.sensitivity;
        if self.steering.invert {
            steer = -steer;
        }
        ControlInput { steer, ..raw }.sanitized()
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(SteeringConfig::default())
    }
}

/// Keeps the car near the centerline and at a cruising speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Autopilot {
    pub cruise_kmh: f64,
    pub lateral_gain: f64,
    pub heading_gain: f64,
}

impl Autopilot {
    /// Autopilot with default gains holding `cruise_kmh`
    pub fn new(cruise_kmh: f64) -> Self {
        Self {
            cruise_kmh,
            lateral_gain: 0.15,
            heading_gain: 2.0,
        }
    }

    /// Raw controls for a car at `lateral` with `heading` on a road pointing `road_heading`
    pub fn drive(&self, lateral: f64, heading: f64, road_heading: f64, speed_kmh: f64) -> ControlInput {
        let steer = self.lateral_gain * lateral + self.heading_gain * wrap_angle(road_heading - heading);
        ControlInput {
            steer: steer.clamp(-1.0, 1.0) as f32,
            gas: speed_kmh < self.cruise_kmh,
            brake: speed_kmh > self.cruise_kmh * 1.1,
        }
    }
}

impl Default for Autopilot {
    fn default() -> Self {
        Self::new(250.0)
    }
}
