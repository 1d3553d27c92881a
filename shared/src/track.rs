//! Procedural track generation
//!
//! The track is an unbounded chain of cubic Bézier chunks. Chunk `n` is a
//! function of chunk `n - 1`'s end state and the next three draws from the
//! room's [`SeededRandom`], so generation is a fold over the chunk index:
//! chunk `k` can only be produced after chunks `0..k`, or by restoring a
//! [`GeneratorSnapshot`] taken at that boundary.

use crate::noise::NoiseField;
use crate::random::SeededRandom;
use glam::DVec3;

/// Number of linear segments used to approximate a chunk's arclength
pub const ARC_SAMPLES: usize = 200;
/// Maximum elevation change between consecutive chunk ends
pub const MAX_RISE_PER_CHUNK: f64 = 6.0;
/// Track height held over water, and the minimum over flat land
pub const WATER_CLEARANCE: f64 = 3.0;
/// Height of the road surface above the terrain it crosses
pub const ROAD_ABOVE_TERRAIN: f64 = 2.0;

const START_POSITION: DVec3 = DVec3::new(0.0, 4.0, 0.0);
const BIAS_WEIGHT: f64 = 0.8;
const BIAS_DECAY: f64 = 0.75;

/// Unit vector on the ground plane for a yaw measured from +Z toward +X
pub fn heading_direction(heading: f64) -> DVec3 {
    DVec3::new(heading.sin(), 0.0, heading.cos())
}

/// Yaw of a direction vector, inverse of [`heading_direction`]
pub fn heading_of(direction: DVec3) -> f64 {
    direction.x.atan2(direction.z)
}

/// Cubic Bézier curve in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicCurve {
    pub p0: DVec3,
    pub p1: DVec3,
    pub p2: DVec3,
    pub p3: DVec3,
}

impl CubicCurve {
    pub fn point(&self, t: f64) -> DVec3 {
        let mt = 1.0 - t;
        self.p0 * (mt * mt * mt)
            + self.p1 * (3.0 * mt * mt * t)
            + self.p2 * (3.0 * mt * t * t)
            + self.p3 * (t * t * t)
    }

    pub fn derivative(&self, t: f64) -> DVec3 {
        let mt = 1.0 - t;
        (self.p1 - self.p0) * (3.0 * mt * mt)
            + (self.p2 - self.p1) * (6.0 * mt * t)
            + (self.p3 - self.p2) * (3.0 * t * t)
    }

    /// Cumulative chord lengths at `samples + 1` evenly spaced parameters
    pub fn arc_lengths(&self, samples: usize) -> Vec<f64> {
        let mut lengths = Vec::with_capacity(samples + 1);
        let mut previous = self.p0;
        let mut total = 0.0;
        lengths.push(0.0);

        for i in 1..=samples {
            let point = self.point(i as f64 / samples as f64);
            total += point.distance(previous);
            lengths.push(total);
            previous = point;
        }

        lengths
    }
}

/// Category a chunk's heading change was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Straight,
    Gentle,
    Sharp,
}

impl TurnKind {
    fn from_draw(draw: f64) -> Self {
        if draw < 0.45 {
            TurnKind::Straight
        } else if draw < 0.85 {
            TurnKind::Gentle
        } else {
            TurnKind::Sharp
        }
    }

    /// Largest absolute heading change in radians
    pub fn max_delta(self) -> f64 {
        match self {
            TurnKind::Straight => 0.06,
            TurnKind::Gentle => 0.28,
            TurnKind::Sharp => 0.55,
        }
    }

    /// Straight-line span between the chunk's start and end points
    pub fn segment_length(self) -> f64 {
        match self {
            TurnKind::Straight => 120.0,
            TurnKind::Gentle => 100.0,
            TurnKind::Sharp => 80.0,
        }
    }
}

/// Where a chunk ends, and therefore where the next one begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkEnd {
    pub position: DVec3,
    pub heading: f64,
    pub distance: f64,
}

/// Position and orientation of the centerline at one track distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackFrame {
    pub position: DVec3,
    pub tangent: DVec3,
    pub right: DVec3,
    pub road_heading: f64,
}

/// One generated segment of track
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub index: u64,
    pub kind: TurnKind,
    pub heading_delta: f64,
    pub start_distance: f64,
    pub end_distance: f64,
    pub length: f64,
    pub curve: CubicCurve,
    pub end_position: DVec3,
    pub end_heading: f64,
    arc_table: Vec<f64>,
}

impl Chunk {
    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.start_distance && distance < self.end_distance
    }

    pub fn end(&self) -> ChunkEnd {
        ChunkEnd {
            position: self.end_position,
            heading: self.end_heading,
            distance: self.end_distance,
        }
    }

    /// Maps an arclength fraction `u` in `[0, 1]` to the curve parameter
    pub fn parameter_at(&self, u: f64) -> f64 {
        let target = u.clamp(0.0, 1.0) * self.length;
        let idx = self.arc_table.partition_point(|&l| l < target);

        if idx == 0 {
            return 0.0;
        }
        if idx >= self.arc_table.len() {
            return 1.0;
        }

        let before = self.arc_table[idx - 1];
        let span = self.arc_table[idx] - before;
        let fraction = if span > 0.0 {
            (target - before) / span
        } else {
            0.0
        };

        ((idx - 1) as f64 + fraction) / ARC_SAMPLES as f64
    }

    /// Centerline frame at an absolute track distance (clamped to this chunk)
    pub fn frame_at(&self, distance: f64) -> TrackFrame {
        let u = if self.length > 0.0 {
            (distance - self.start_distance) / self.length
        } else {
            0.0
        };
        let t = self.parameter_at(u);

        let position = self.curve.point(t);
        let mut tangent = self.curve.derivative(t).normalize_or_zero();
        if tangent == DVec3::ZERO {
            tangent = heading_direction(self.end_heading);
        }
        let right = tangent.cross(DVec3::Y).normalize_or_zero();

        TrackFrame {
            position,
            tangent,
            right,
            road_heading: heading_of(tangent),
        }
    }
}

/// Everything needed to resume generation at a chunk boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorSnapshot {
    pub rng: SeededRandom,
    pub previous: ChunkEnd,
    pub next_index: u64,
    pub curvature_bias: f64,
}

/// Sequential chunk producer for one seed
#[derive(Debug, Clone)]
pub struct TrackGenerator {
    seed: u32,
    rng: SeededRandom,
    noise: NoiseField,
    previous: ChunkEnd,
    next_index: u64,
    curvature_bias: f64,
}

impl TrackGenerator {
    /// Builds the noise table from the seed's first 256 draws; chunk draws follow
    pub fn new(seed: u32) -> Self {
        let mut rng = SeededRandom::new(seed);
        let noise = NoiseField::from_random(&mut rng);

        Self {
            seed,
            rng,
            noise,
            previous: ChunkEnd {
                position: START_POSITION,
                heading: 0.0,
                distance: 0.0,
            },
            next_index: 0,
            curvature_bias: 0.0,
        }
    }

    /// Fresh generator advanced so that the next chunk produced is `index`
    pub fn replay_to(seed: u32, index: u64) -> Self {
        let mut generator = Self::new(seed);
        while generator.next_index < index {
            generator.next_chunk();
        }
        generator
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn previous_end(&self) -> ChunkEnd {
        self.previous
    }

    pub fn noise(&self) -> &NoiseField {
        &self.noise
    }

    pub fn snapshot(&self) -> GeneratorSnapshot {
        GeneratorSnapshot {
            rng: self.rng,
            previous: self.previous,
            next_index: self.next_index,
            curvature_bias: self.curvature_bias,
        }
    }

    /// Rewinds or fast-forwards to a snapshot taken from a generator with the same seed
    pub fn restore(&mut self, snapshot: GeneratorSnapshot) {
        self.rng = snapshot.rng;
        self.previous = snapshot.previous;
        self.next_index = snapshot.next_index;
        self.curvature_bias = snapshot.curvature_bias;
    }

    pub fn generate(&mut self, count: usize) -> Vec<Chunk> {
        (0..count).map(|_| self.next_chunk()).collect()
    }

    pub fn next_chunk(&mut self) -> Chunk {
        let previous = self.previous;
        let chunk = self.build_chunk(previous);

        self.previous = chunk.end();
        self.next_index += 1;
        chunk
    }

    fn build_chunk(&mut self, previous: ChunkEnd) -> Chunk {
        // Exactly three draws per chunk, always in this order.
        let kind = TurnKind::from_draw(self.rng.next());
        let magnitude = self.rng.next() * kind.max_delta();
        let positive_chance = (0.5 - self.curvature_bias * BIAS_WEIGHT).clamp(0.1, 0.9);
        let heading_delta = if self.rng.next() < positive_chance {
            magnitude
        } else {
            -magnitude
        };
        self.curvature_bias = (self.curvature_bias + heading_delta) * BIAS_DECAY;

        let segment = kind.segment_length();
        let end_heading = previous.heading + heading_delta;
        let p0 = previous.position;
        let mut p3 = p0 + heading_direction(end_heading) * segment;
        p3.y = self.end_elevation(p3.x, p3.z, p0.y);

        let handle = segment * 0.5;
        let mut p1 = p0 + heading_direction(previous.heading) * handle;
        p1.y = p0.y;
        let mut p2 = p3 - heading_direction(end_heading) * handle;
        p2.y = p3.y;

        let curve = CubicCurve { p0, p1, p2, p3 };
        let arc_table = curve.arc_lengths(ARC_SAMPLES);
        let length = arc_table[ARC_SAMPLES];

        Chunk {
            index: self.next_index,
            kind,
            heading_delta,
            start_distance: previous.distance,
            end_distance: previous.distance + length,
            length,
            curve,
            end_position: p3,
            end_heading,
            arc_table,
        }
    }

    /// Road height at a chunk end, hard-clamped against the previous end
    fn end_elevation(&self, x: f64, z: f64, previous_y: f64) -> f64 {
        let terrain = self.noise.elevation(x, z);
        let target = if terrain < 1.0 {
            previous_y.max(WATER_CLEARANCE)
        } else {
            terrain + ROAD_ABOVE_TERRAIN
        };
        target.clamp(
            previous_y - MAX_RISE_PER_CHUNK,
            previous_y + MAX_RISE_PER_CHUNK,
        )
    }
}
