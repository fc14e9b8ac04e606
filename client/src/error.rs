use shared::bus::WaitError;
use shared::handshake::HandshakeError;
use shared::key::KeyError;
use shared::message::MessageError;
use shared::snapshot::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("protocol error: {0}")]
    Message(#[from] MessageError),
    #[error("invalid identity key: {0}")]
    Key(#[from] KeyError),
    #[error("bad snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("disconnected from server")]
    Disconnected,
    #[error("server assigned key {assigned}, expected {offered}")]
    KeyMismatch { offered: String, assigned: String },
    #[error("game has not started on this session")]
    NotStarted,
}

impl From<WaitError> for ClientError {
    fn from(_: WaitError) -> Self {
        ClientError::Disconnected
    }
}

/// Answer to a `JOINLOBBY` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// No lobby has that key.
    LobbyNotExist,
    /// The lobby is full or has already started.
    LobbyNotAccept,
}
