//! # Lobby Server Library
//!
//! Authoritative side of the multiplayer session protocol. The server accepts
//! TCP connections, upgrades them to the framed transport, places clients in
//! lobbies, and runs one fixed-tick simulation per started lobby.
//!
//! ## Connection Lifecycle
//!
//! Every accepted stream goes through the same steps:
//! - Upgrade handshake; plain HTTP requests are answered with `426` and closed
//! - The connection joins the queue under its identity key (duplicate keys are
//!   closed with code 1008)
//! - A session task runs the request/response flow in [`session`]
//! - When the connection closes, the client is removed from the queue or its
//!   lobby, and an empty lobby is closed
//!
//! ## Lobby Simulation
//!
//! Starting a lobby sends every member the ordered member keys and a shared
//! seed, so clients can build the exact initial state the server builds. From
//! then on the lobby's task relays held keys every tick and broadcasts a
//! timestamped snapshot every broadcast interval (see [`game`]).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default().validate()?;
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod lobby;
pub mod network;
pub mod session;

use lobby::LobbyManager;
use shared::connection::ConnectionHandle;
use shared::{ClientHeader, ServerHeader};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Server-side handle of one client connection.
pub type ClientConnection = ConnectionHandle<ClientHeader, ServerHeader>;

/// Lobby bookkeeping shared by all connection tasks.
pub type SharedLobbies = Arc<RwLock<LobbyManager>>;
