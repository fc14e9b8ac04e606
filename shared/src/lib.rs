//! Protocol and simulation code shared by the lobby server and its clients.
//!
//! The server and every client run the exact same simulation from the same
//! seed, so everything that must agree bit-for-bit across the wire lives here:
//!
//! - [`frame`] and [`handshake`]: the framed transport (upgrade handshake,
//!   frame parsing, masking, close codes)
//! - [`message`]: the one-byte header protocol layered on top of frames, plus
//!   the fixed body layouts of every header
//! - [`connection`] and [`bus`]: the per-connection frame task and the typed
//!   message registry it feeds
//! - [`game`], [`entity`], [`vector`], [`ids`], [`random`], [`input`]: the
//!   fixed-step simulation
//! - [`snapshot`]: the type-tagged binary encoding of the simulation's object
//!   list and tolerance-based equality between two snapshots

pub mod bus;
pub mod connection;
pub mod entity;
pub mod frame;
pub mod game;
pub mod handshake;
pub mod ids;
pub mod input;
pub mod key;
pub mod message;
pub mod random;
pub mod snapshot;
pub mod vector;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use entity::{Entity, EntityId, GameObject, PhysicalEntity, PlayerEntity};
pub use game::{Game, KeyStates};
pub use input::{KeySet, LogicalKey};
pub use key::IdentityKey;
pub use message::{ClientHeader, Header, ServerHeader};
pub use snapshot::{ApproxEq, Snapshot};
pub use vector::Vector2;

/// Maximum number of clients in one lobby, host included.
pub const MAX_LOBBY_SIZE: usize = 6;

/// Length in bytes of every identity key on the wire.
pub const KEY_LEN: usize = 24;

/// Client-side bound on the prediction history queue.
pub const MAX_SNAPSHOT_HISTORY: usize = 10;

/// Velocity impulse added per tick while a movement key is held (units/ms).
pub const PLAYER_SPEED: f32 = 0.05;

/// Per-tick multiplier applied to player velocity before integration.
pub const VELOCITY_DAMPING: f32 = 0.9;

/// Lower bound of the play field on both axes.
pub const FIELD_MIN: f32 = 0.0;

/// Upper bound of the play field on both axes.
pub const FIELD_MAX: f32 = 65535.0;

/// Two vector components closer than this compare equal in snapshots.
pub const POSITION_TOLERANCE: f32 = 2.0;

/// Region in which players spawn, on both axes.
pub const SPAWN_MIN: f32 = 100.0;
pub const SPAWN_MAX: f32 = 400.0;

/// Default fixed simulation step in milliseconds (60 Hz).
pub const TICK_INTERVAL_MS: f32 = 1000.0 / 60.0;

/// Default interval between authoritative snapshot broadcasts (5 Hz).
pub const BROADCAST_INTERVAL_MS: u64 = 200;

/// Default tick interval as a [`Duration`].
pub fn default_tick_interval() -> Duration {
    Duration::from_secs_f32(TICK_INTERVAL_MS / 1000.0)
}

/// Simulation step, in milliseconds, for one tick of `interval`.
pub fn step_millis(interval: Duration) -> f32 {
    interval.as_secs_f32() * 1000.0
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
