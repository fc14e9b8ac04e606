//! # Lobby Client Library
//!
//! Client side of the multiplayer session protocol. A client connects to the
//! server over the framed transport, hosts or joins a lobby, and once the
//! lobby starts runs its own copy of the shared simulation.
//!
//! ## Client-Side Prediction
//!
//! The local simulation never waits for the server. Each tick it applies the
//! local player's held keys immediately, together with the keys the server
//! relays for every other member.
//!
//! ## Server Reconciliation
//!
//! Snapshots of the local prediction are saved shortly before each expected
//! server broadcast. Every authoritative snapshot is compared to the oldest
//! saved one within a small tolerance; on a mismatch the client adopts the
//! server's object list wholesale (see [`reconcile`]).
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::{ClientGame, Timing};
//! use client::rendering::LogRenderer;
//! use client::session::Session;
//! use shared::KeySet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::establish("127.0.0.1:8000").await?;
//!     session.host().await?;
//!     session.start_game().await?;
//!     let start = session.await_start().await?;
//!
//!     let (server, streams, _transport) = session.into_parts();
//!     let held = KeySet::parse("D").unwrap_or_default();
//!     let mut game = ClientGame::new(server, streams, &start, held, LogRenderer::default(), Timing::default());
//!     game.run(None).await?;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod game;
pub mod input;
pub mod reconcile;
pub mod rendering;
pub mod session;

pub use error::{ClientError, JoinOutcome};

use shared::connection::ConnectionHandle;
use shared::{ClientHeader, ServerHeader};

/// Client-side handle of the server connection.
pub type ServerConnection = ConnectionHandle<ServerHeader, ClientHeader>;
