//! # Color Lobby Server Library
//!
//! This library provides the authoritative server for a small multiplayer
//! session. The server admits peers up to a fixed capacity, hands each peer one
//! color from a finite shared pool, and replicates every peer's entity
//! (position and color) to all connected peers.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! A connecting peer is approved only while fewer peers than there are colors
//! hold one. Rejected peers are told why ("lobby full (6 players max)").
//!
//! ### Color Pool
//! Colors are popped from the head of the pool and reclaimed to its tail, so
//! the color that has been free the longest is handed out next. Free and held
//! colors together always make up the palette exactly once.
//!
//! ### Replicated State
//! The server holds the only authoritative copy of each entity's fields. Every
//! committed write is pushed to every connected peer, fire-and-forget, with a
//! per-field sequence so peers apply same-field updates in commit order.
//!
//! ### Requests
//! Peers may ask to move their entity or to get a new color. A request can
//! only ever act on the sender's own entity.
//!
//! ## Architecture Design
//!
//! ### Single Mutation Path
//! Connects, disconnects, requests and operator commands all pass through one
//! channel into the task that owns the [`game::GameState`]. Pool, assignments
//! and entity fields are therefore mutated as one unit and concurrent events
//! are applied one at a time.
//!
//! ### UDP-Based Communication
//! Uses a UDP socket and bincode-encoded [`shared::Packet`]s. Peer identity is
//! the binding between a source address and the peer id handed out on
//! admission.
//!
//! ## Module Organization
//!
//! - `color_pool`: the finite pool and the peer→color assignments
//! - `admission`: the join decision
//! - `replication`: entity fields, write capabilities, observers and fan-out
//! - `gateway`: move and recolor request handling
//! - `game`: the session owning all of the above
//! - `client_manager`: address↔peer bindings and liveness
//! - `network`: the UDP server loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::SessionConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         SessionConfig::default(),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod client_manager;
pub mod color_pool;
pub mod error;
pub mod game;
pub mod gateway;
pub mod network;
pub mod replication;
