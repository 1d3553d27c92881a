//! # Race Client Library
//!
//! The display side of the game, without the display. A client connects to a
//! relay server, creates, joins or lists rooms, streams its controls and turns
//! the snapshots it receives into world-space vehicle poses.
//!
//! ## Track
//!
//! Joining a room yields its seed. The client rebuilds the room's track from
//! that seed with the same generator the server uses, so no geometry ever
//! crosses the network and both sides agree on every chunk bit for bit.
//!
//! ## Module Organization
//!
//! - `reconciler`: snapshot targets, per-frame blending, pose construction
//! - `input`: sequencing, change detection, steering preferences, autopilot
//! - `rendering`: the [`rendering::PoseSink`] boundary and a logging sink
//! - `network`: UDP session with retried room requests
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig, SessionGoal};
//! use client::rendering::LogSink;
//! use shared::RoomRules;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1:3000", SessionGoal::Create(RoomRules::default()));
//!     let mut client = Client::new(config, Box::new(LogSink::default())).await?;
//!     client.run().await
//! }
//! ```

pub mod input;
pub mod network;
pub mod reconciler;
pub mod rendering;
