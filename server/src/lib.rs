//! # Race Relay Server Library
//!
//! The authoritative half of the game. Players connect over UDP, open or join
//! rooms, and stream their controls; the server steps every vehicle in every
//! room at a fixed rate and sends each room's members a snapshot per tick.
//!
//! ## Rooms
//!
//! A room is identified by a short upper-case code and owns a 32-bit seed.
//! Every participant rebuilds the same infinite track from that seed, so the
//! server only ever sends vehicle state, never geometry. The room's own
//! chunk window streams track ahead of its fastest vehicle and drops track
//! far behind its slowest one.
//!
//! ## Reliability
//!
//! Snapshots are fire-and-forget; a lost one is superseded by the next tick.
//! Room-management requests carry a request id and are retried by the client
//! until answered. The server keeps the last reply per client and answers
//! retries from it, so a request never runs twice.
//!
//! ## Tasks
//!
//! - **Network Receiver**: decodes datagrams and forwards them to the main loop
//! - **Network Sender**: drains the outbound queue so a tick never waits on a socket
//! - **Timeout Checker**: drops clients silent for longer than the timeout
//! - **Main Loop**: owns the rooms, applies requests and inputs, ticks rooms
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "0.0.0.0:3000",
//!         Duration::from_secs_f64(1.0 / 60.0),
//!         64,
//!     ).await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod error;
pub mod network;
pub mod room;
pub mod room_manager;
