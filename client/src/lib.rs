//! # Game Client Library
//!
//! Client side of the multiplayer position-sync protocol. The rendering and
//! menu layers live elsewhere and talk to this crate through two calls:
//! "submit my current input" and "read the latest world snapshot".
//!
//! ## Architecture Overview
//!
//! ### Connection Manager
//! [`network::ConnectionManager`] owns a single TCP connection. A background
//! thread decodes every snapshot the server sends and publishes it by
//! swapping an `Arc`, so readers always get a complete, immutable copy and
//! never wait on the network.
//!
//! ### Request-Driven Updates
//! The server replies once per input it receives. A client that stops
//! sending input stops receiving updates, including other players' movement.
//!
//! ### Errors Stay Local
//! Connection problems surface as `ConnectError` from `connect`, `false`
//! from `send_input`, and `last_error()` afterwards. Nothing here panics or
//! retries; reconnecting is up to the caller.
//!
//! ## Module Organization
//!
//! - `network`: connection lifecycle, receive thread, snapshot access
//! - `input`: scripted input patterns for headless clients
//! - `bot`: fixed-rate loop that drives a connection from a script
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::ConnectionManager;
//! use shared::InputState;
//!
//! let mut connection = ConnectionManager::default();
//! connection.connect("127.0.0.1", 50000, "dasher")?;
//!
//! let input = InputState { right: true, ..InputState::default() };
//! if connection.send_input(input) {
//!     for player in connection.snapshot().values() {
//!         println!("{} at ({}, {})", player.name, player.x, player.y);
//!     }
//! }
//!
//! connection.disconnect();
//! # Ok::<(), client::network::ConnectError>(())
//! ```

pub mod bot;
pub mod input;
pub mod network;
