//! # Game Server Library
//!
//! Authoritative server for the multiplayer position-sync protocol. It owns
//! the registry of connected players, applies each client's movement input,
//! and answers every input with the full registry.
//!
//! ## Core Responsibilities
//!
//! ### Player Registry
//! One entry per open, initialized connection. Identities are assigned from a
//! counter that is never reset, so an identity is never reused during a run.
//! The registry and the counter sit behind a single mutex; handlers hold it
//! only for the duration of one update.
//!
//! ### Connection Handling
//! Each connection runs its own loop: decode an input frame, apply it, send
//! the resulting snapshot back. Any read, write or protocol failure ends the
//! session and removes the player. A failure on one connection never affects
//! the others.
//!
//! ### Request-Driven Sync
//! The server does not push updates on its own. A client learns about other
//! players' movement in the reply to its own next input.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! - `PlayerRegistry`: identity to `PlayerState`, movement rule, snapshots
//! - `World`: registry plus identity counter under one lock
//!
//! ### Connection Module (`connection`)
//! - Per-connection state machine (`Initializing -> Active -> Closed`)
//! - Idle and write timeouts
//!
//! ### Network Module (`network`)
//! - TCP listener and accept loop
//! - Connection cap and shutdown policy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!
//!     // Runs until Ctrl-C, then closes the listener and drops every client
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod network;
pub mod registry;
