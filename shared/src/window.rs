//! Sliding window of generated chunks and the arclength query over it

use crate::track::{Chunk, TrackFrame, TrackGenerator};
use std::collections::VecDeque;
use thiserror::Error;

/// Track lookups that can miss while the window is still streaming
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TrackError {
    /// The distance lies outside the chunks currently held; try again next tick
    #[error("track distance {distance:.2} is outside the generated window")]
    WindowNotReady { distance: f64 },
}

/// Anything that can answer "where is the centerline at this distance"
pub trait TrackQuery {
    fn locate(&self, distance: f64) -> Result<TrackFrame, TrackError>;
}

/// How far the window streams ahead and how much it keeps behind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub lookahead: f64,
    pub trailing: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookahead: 1400.0,
            trailing: 400.0,
        }
    }
}

/// Ordered, contiguous run of chunks covering `[min_distance, max_distance)`
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    generator: TrackGenerator,
    chunks: VecDeque<Chunk>,
    config: WindowConfig,
}

impl ChunkWindow {
    pub fn new(seed: u32) -> Self {
        Self::with_config(seed, WindowConfig::default())
    }

    pub fn with_config(seed: u32, config: WindowConfig) -> Self {
        let mut window = Self {
            generator: TrackGenerator::new(seed),
            chunks: VecDeque::new(),
            config,
        };
        window.ensure_ahead(0.0);
        window
    }

    pub fn seed(&self) -> u32 {
        self.generator.seed()
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn min_distance(&self) -> f64 {
        self.chunks.front().map_or(0.0, |c| c.start_distance)
    }

    pub fn max_distance(&self) -> f64 {
        self.chunks.back().map_or(0.0, |c| c.end_distance)
    }

    pub fn contains(&self, distance: f64) -> bool {
        !self.chunks.is_empty() && distance >= self.min_distance() && distance < self.max_distance()
    }

    /// Generates chunks until the window reaches `lookahead` past `distance`.
    /// Returns how many chunks were added.
    pub fn ensure_ahead(&mut self, distance: f64) -> usize {
        let mut added = 0;
        while self.chunks.is_empty() || self.max_distance() - distance < self.config.lookahead {
            self.chunks.push_back(self.generator.next_chunk());
            added += 1;
        }
        added
    }

    /// Drops chunks that end more than `trailing` behind `distance`.
    /// Never drops the chunk containing `distance` nor the last chunk held.
    /// Returns how many were dropped.
    pub fn evict_behind(&mut self, distance: f64) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.chunks.front() {
            if self.chunks.len() == 1
                || front.end_distance >= distance - self.config.trailing
                || front.end_distance > distance
            {
                break;
            }
            self.chunks.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Keeps every vehicle in `[slowest, fastest]` covered
    pub fn maintain(&mut self, slowest: f64, fastest: f64) {
        self.ensure_ahead(fastest);
        self.evict_behind(slowest);
    }

    fn chunk_for(&self, distance: f64) -> Option<&Chunk> {
        // Chunks are sorted by start distance; find the last one starting at or before `distance`.
        let idx = self.chunks.partition_point(|c| c.start_distance <= distance);
        if idx == 0 {
            return None;
        }
        self.chunks.get(idx - 1).filter(|c| c.contains(distance))
    }
}

impl TrackQuery for ChunkWindow {
    fn locate(&self, distance: f64) -> Result<TrackFrame, TrackError> {
        self.chunk_for(distance)
            .map(|chunk| chunk.frame_at(distance))
            .ok_or(TrackError::WindowNotReady { distance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_new_window_covers_lookahead() {
        let window = ChunkWindow::new(1234);
        assert!(!window.is_empty());
        assert_eq!(window.min_distance(), 0.0);
        assert!(window.max_distance() >= WindowConfig::default().lookahead);
    }

    #[test]
    fn test_ensure_ahead_is_idempotent() {
        let mut window = ChunkWindow::new(5);
        let before = window.len();
        assert_eq!(window.ensure_ahead(0.0), 0);
        assert_eq!(window.len(), before);
    }

    #[test]
    fn test_ensure_ahead_streams_forward() {
        let mut window = ChunkWindow::new(5);
        window.ensure_ahead(5000.0);
        assert!(window.max_distance() - 5000.0 >= window.config().lookahead);
    }

    #[test]
    fn test_evict_behind_keeps_trailing_margin() {
        let mut window = ChunkWindow::new(11);
        window.ensure_ahead(3000.0);
        let dropped = window.evict_behind(3000.0);
        assert!(dropped > 0);
        assert!(window.chunks().next().unwrap().end_distance >= 3000.0 - 400.0);
        assert!(window.contains(3000.0));
    }

    #[test]
    fn test_evict_never_drops_containing_chunk() {
        let config = WindowConfig {
            lookahead: 300.0,
            trailing: 0.0,
        };
        let mut window = ChunkWindow::with_config(4, config);
        window.ensure_ahead(1000.0);
        window.evict_behind(1000.0);
        assert!(window.contains(1000.0));
        assert!(window.locate(1000.0).is_ok());
    }

    #[test]
    fn test_locate_misses_outside_window() {
        let window = ChunkWindow::new(9);
        let beyond = window.max_distance() + 1.0;
        assert_eq!(
            window.locate(beyond),
            Err(TrackError::WindowNotReady { distance: beyond })
        );
        assert!(window.locate(-1.0).is_err());
    }

    #[test]
    fn test_locate_matches_chunk_frame() {
        let window = ChunkWindow::new(21);
        for chunk in window.chunks() {
            let d = chunk.start_distance + chunk.length * 0.3;
            let frame = window.locate(d).unwrap();
            assert_eq!(frame, chunk.frame_at(d));
        }
    }

    #[test]
    fn test_locate_is_continuous_across_boundaries() {
        let window = ChunkWindow::new(21);
        let boundaries: Vec<f64> = window.chunks().skip(1).map(|c| c.start_distance).collect();
        for boundary in boundaries.into_iter().take(5) {
            let before = window.locate(boundary - 1e-6).unwrap();
            let after = window.locate(boundary).unwrap();
            assert!(before.position.distance(after.position) < 1e-3);
            assert_approx_eq!(before.road_heading, after.road_heading, 1e-3);
        }
    }

    #[test]
    fn test_same_seed_same_window() {
        let a = ChunkWindow::new(100);
        let b = ChunkWindow::new(100);
        let frame_a = a.locate(777.7).unwrap();
        let frame_b = b.locate(777.7).unwrap();
        assert_eq!(frame_a, frame_b);
    }

    #[test]
    fn test_maintain_covers_vehicle_span() {
        let mut window = ChunkWindow::new(3);
        window.maintain(1200.0, 4800.0);
        assert!(window.contains(1200.0));
        assert!(window.contains(4800.0));
    }
}
