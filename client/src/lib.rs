//! # Color Lobby Client Library
//!
//! A headless peer for the color lobby server. It joins the session, keeps a
//! local replica of every entity the server announces and lets the user ask
//! for a move or a new color from the terminal.
//!
//! ## Module Organization
//!
//! ### Replica Module (`replica`)
//! Local copies of the server's entities. Each field tracks the sequence of
//! the last update applied so that a late, stale update never overwrites a
//! newer value.
//!
//! ### Commands Module (`commands`)
//! Parses console lines (`move`, `color`, `list`, `quit`) into commands and
//! the request packets the server understands.
//!
//! ### Network Module (`network`)
//! The UDP session: connect, admission handling, heartbeats and the main loop
//! multiplexing socket, timer and stdin.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080").await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The client never changes its own fields. It only sends requests and shows
//! whatever the server commits.

pub mod commands;
pub mod network;
pub mod replica;
