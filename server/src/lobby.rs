//! Lobby and queue bookkeeping for the session server
//!
//! This module tracks where every connected client currently is:
//! - Clients start in the queue right after the upgrade handshake
//! - A queued client either hosts a new lobby or joins an existing one
//! - A lobby accepts members while it is waiting and not full
//! - Lobbies whose last member leaves are closed and dropped
//!
//! The manager itself is plain data. The async request/response flow that
//! drives it lives in [`crate::session`], and the running simulation of a
//! started lobby lives in [`crate::game`].

use crate::ClientConnection;
use log::{debug, info};
use shared::message::MessageError;
use shared::bus::WaitError;
use shared::{IdentityKey, MAX_LOBBY_SIZE};
use std::collections::HashMap;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection closed")]
    Disconnected,
    #[error("identity key is already connected")]
    DuplicateKey,
    #[error("lobby does not exist")]
    LobbyNotFound,
    #[error("lobby is full or already started")]
    LobbyNotAccepting,
    #[error("client is not the host of a waiting lobby")]
    NotHost,
    #[error("client is not in the queue")]
    NotQueued,
    #[error(transparent)]
    Protocol(#[from] MessageError),
}

impl From<WaitError> for SessionError {
    fn from(_: WaitError) -> Self {
        SessionError::Disconnected
    }
}

/// Placement of a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    InQueue,
    /// Member of the lobby with this key.
    InLobby(IdentityKey),
    /// Not connected, or already removed.
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    Waiting,
    Started,
    Closed,
}

/// A group of clients sharing one simulation once started.
///
/// The lobby key is the host's identity key. Members are kept in join order,
/// which is also the order their player entities are created in.
pub struct Lobby {
    key: IdentityKey,
    members: Vec<ClientConnection>,
    state: LobbyState,
    /// Tick and broadcast task, present once started.
    game: Option<JoinHandle<()>>,
}

impl Lobby {
    fn new(host: ClientConnection) -> Self {
        Self {
            key: host.key().clone(),
            members: vec![host],
            state: LobbyState::Waiting,
            game: None,
        }
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn members(&self) -> &[ClientConnection] {
        &self.members
    }

    pub fn member_keys(&self) -> Vec<IdentityKey> {
        self.members.iter().map(|member| member.key().clone()).collect()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_LOBBY_SIZE
    }

    /// Whether a new member may join right now.
    pub fn accepts_members(&self) -> bool {
        self.state == LobbyState::Waiting && !self.is_full()
    }

    fn contains(&self, key: &IdentityKey) -> bool {
        self.members.iter().any(|member| member.key() == key)
    }

    fn close(&mut self) {
        self.state = LobbyState::Closed;
        if let Some(game) = self.game.take() {
            game.abort();
        }
    }
}

/// Queue of unplaced clients plus the set of open lobbies.
#[derive(Default)]
pub struct LobbyManager {
    /// Clients connected but not yet in a lobby, by identity key
    queue: HashMap<IdentityKey, ClientConnection>,
    /// Open lobbies by lobby key
    lobbies: HashMap<IdentityKey, Lobby>,
}

impl LobbyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a freshly upgraded connection in the queue
    ///
    /// Fails with [`SessionError::DuplicateKey`] when a client with the same
    /// identity key is already queued or in a lobby; the key is the client's
    /// only identity, so two live connections may not share it.
    pub fn enqueue(&mut self, client: ClientConnection) -> Result<(), SessionError> {
        let key = client.key().clone();
        if self.client_state(&key) != ClientState::Left {
            return Err(SessionError::DuplicateKey);
        }

        debug!("Client {} queued", key);
        self.queue.insert(key, client);
        Ok(())
    }

    pub fn client_state(&self, key: &IdentityKey) -> ClientState {
        if self.queue.contains_key(key) {
            return ClientState::InQueue;
        }
        self.lobbies
            .values()
            .find(|lobby| lobby.contains(key))
            .map_or(ClientState::Left, |lobby| ClientState::InLobby(lobby.key.clone()))
    }

    /// Moves a queued client into a new waiting lobby keyed by its own identity.
    pub fn host(&mut self, key: &IdentityKey) -> Result<(), SessionError> {
        if self.lobbies.contains_key(key) {
            return Err(SessionError::DuplicateKey);
        }
        let host = self.queue.remove(key).ok_or(SessionError::NotQueued)?;

        info!("Client {} hosts a new lobby", key);
        self.lobbies.insert(key.clone(), Lobby::new(host));
        Ok(())
    }

    /// Moves a queued client into the lobby `lobby_key`
    ///
    /// A rejected client stays in the queue and may try again.
    pub fn join(&mut self, key: &IdentityKey, lobby_key: &IdentityKey) -> Result<(), SessionError> {
        if !self.queue.contains_key(key) {
            return Err(SessionError::NotQueued);
        }

        let lobby = self.lobbies.get_mut(lobby_key).ok_or(SessionError::LobbyNotFound)?;
        if !lobby.accepts_members() {
            info!(
                "Client {} rejected by lobby {} ({:?}, {} members)",
                key,
                lobby_key,
                lobby.state,
                lobby.members.len()
            );
            return Err(SessionError::LobbyNotAccepting);
        }

        if let Some(client) = self.queue.remove(key) {
            lobby.members.push(client);
        }
        info!(
            "Client {} joined lobby {} ({}/{})",
            key,
            lobby_key,
            lobby.members.len(),
            MAX_LOBBY_SIZE
        );
        Ok(())
    }

    /// Marks the lobby hosted by `host` as started and returns its members in order.
    pub fn start(&mut self, host: &IdentityKey) -> Result<Vec<ClientConnection>, SessionError> {
        let lobby = self.lobbies.get_mut(host).ok_or(SessionError::NotHost)?;
        if lobby.state != LobbyState::Waiting {
            return Err(SessionError::NotHost);
        }

        lobby.state = LobbyState::Started;
        info!("Lobby {} started with {} members", host, lobby.members.len());
        Ok(lobby.members.clone())
    }

    /// Hands the running game task to its lobby
    ///
    /// If the lobby was closed in the meantime the task is aborted right away.
    pub fn attach_game(&mut self, lobby_key: &IdentityKey, game: JoinHandle<()>) {
        match self.lobbies.get_mut(lobby_key) {
            Some(lobby) if lobby.state == LobbyState::Started => lobby.game = Some(game),
            _ => {
                debug!("Lobby {} is gone, stopping its game", lobby_key);
                game.abort();
            }
        }
    }

    /// Removes a disconnected client from wherever it is
    ///
    /// Returns the client's state before removal. A lobby left without
    /// members is closed, its game stopped, and the lobby dropped.
    pub fn leave(&mut self, key: &IdentityKey) -> ClientState {
        if self.queue.remove(key).is_some() {
            debug!("Client {} left the queue", key);
            return ClientState::InQueue;
        }

        let Some(lobby) = self.lobbies.values_mut().find(|lobby| lobby.contains(key)) else {
            return ClientState::Left;
        };
        lobby.members.retain(|member| member.key() != key);
        let lobby_key = lobby.key.clone();
        info!("Client {} left lobby {}", key, lobby_key);

        if lobby.members.is_empty() {
            lobby.close();
            self.lobbies.remove(&lobby_key);
            info!("Lobby {} is empty and was closed", lobby_key);
        }

        ClientState::InLobby(lobby_key)
    }

    pub fn lobby(&self, key: &IdentityKey) -> Option<&Lobby> {
        self.lobbies.get(key)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::connection::Connection;
    use shared::frame::Role;

    /// A handle whose connection task never runs; sends are queued and ignored.
    fn client(n: usize) -> ClientConnection {
        let key = IdentityKey::new(format!("{:0>24}", n)).unwrap();
        let (stream, _peer) = tokio::io::duplex(64);
        let (_connection, handle) = Connection::new(stream, Role::Server, key, Vec::new());
        handle
    }

    fn key(n: usize) -> IdentityKey {
        IdentityKey::new(format!("{:0>24}", n)).unwrap()
    }

    fn lobby_with_members(count: usize) -> LobbyManager {
        let mut manager = LobbyManager::new();
        for n in 0..count {
            manager.enqueue(client(n)).unwrap();
        }
        manager.host(&key(0)).unwrap();
        for n in 1..count {
            manager.join(&key(n), &key(0)).unwrap();
        }
        manager
    }

    #[test]
    fn test_enqueue_and_duplicate_key() {
        let mut manager = LobbyManager::new();
        manager.enqueue(client(1)).unwrap();
        assert_eq!(manager.client_state(&key(1)), ClientState::InQueue);
        assert!(matches!(manager.enqueue(client(1)), Err(SessionError::DuplicateKey)));

        manager.host(&key(1)).unwrap();
        assert!(matches!(manager.enqueue(client(1)), Err(SessionError::DuplicateKey)));
    }

    #[test]
    fn test_host_creates_waiting_lobby() {
        let mut manager = LobbyManager::new();
        manager.enqueue(client(1)).unwrap();
        manager.host(&key(1)).unwrap();

        assert_eq!(manager.queue_len(), 0);
        assert_eq!(manager.client_state(&key(1)), ClientState::InLobby(key(1)));
        let lobby = manager.lobby(&key(1)).unwrap();
        assert_eq!(lobby.state(), LobbyState::Waiting);
        assert_eq!(lobby.member_keys(), vec![key(1)]);

        assert!(matches!(manager.host(&key(2)), Err(SessionError::NotQueued)));
    }

    #[test]
    fn test_join_unknown_lobby_stays_queued() {
        let mut manager = LobbyManager::new();
        manager.enqueue(client(1)).unwrap();

        assert!(matches!(manager.join(&key(1), &key(9)), Err(SessionError::LobbyNotFound)));
        assert_eq!(manager.client_state(&key(1)), ClientState::InQueue);
    }

    #[test]
    fn test_seventh_member_rejected() {
        let mut manager = lobby_with_members(MAX_LOBBY_SIZE);
        assert!(manager.lobby(&key(0)).unwrap().is_full());

        manager.enqueue(client(7)).unwrap();
        assert!(matches!(
            manager.join(&key(7), &key(0)),
            Err(SessionError::LobbyNotAccepting)
        ));
        assert_eq!(manager.client_state(&key(7)), ClientState::InQueue);
        assert_eq!(manager.lobby(&key(0)).unwrap().members().len(), MAX_LOBBY_SIZE);
    }

    #[test]
    fn test_started_lobby_rejects_members() {
        let mut manager = lobby_with_members(2);
        let members = manager.start(&key(0)).unwrap();
        assert_eq!(
            members.iter().map(|m| m.key().clone()).collect::<Vec<_>>(),
            vec![key(0), key(1)]
        );

        manager.enqueue(client(5)).unwrap();
        assert!(matches!(
            manager.join(&key(5), &key(0)),
            Err(SessionError::LobbyNotAccepting)
        ));
        assert!(matches!(manager.start(&key(0)), Err(SessionError::NotHost)));
    }

    #[test]
    fn test_only_host_key_starts() {
        let mut manager = lobby_with_members(2);
        assert!(matches!(manager.start(&key(1)), Err(SessionError::NotHost)));
        assert_eq!(manager.lobby(&key(0)).unwrap().state(), LobbyState::Waiting);
    }

    #[tokio::test]
    async fn test_empty_lobby_is_reaped() {
        let mut manager = lobby_with_members(2);
        manager.start(&key(0)).unwrap();
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        let game = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });
        manager.attach_game(&key(0), game);

        assert_eq!(manager.leave(&key(0)), ClientState::InLobby(key(0)));
        assert_eq!(manager.lobby_count(), 1);
        assert_eq!(manager.lobby(&key(0)).unwrap().member_keys(), vec![key(1)]);

        assert_eq!(manager.leave(&key(1)), ClientState::InLobby(key(0)));
        assert_eq!(manager.lobby_count(), 0);
        assert!(stopped.await.is_err());
        assert_eq!(manager.leave(&key(1)), ClientState::Left);
    }

    #[tokio::test]
    async fn test_game_for_closed_lobby_is_aborted() {
        let mut manager = LobbyManager::new();
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        let game = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });

        manager.attach_game(&key(3), game);
        assert!(stopped.await.is_err());
    }
}
