//! Client side of the session flow: greeting, host or join, and game start.

use crate::connection::connect;
use crate::error::{ClientError, JoinOutcome};
use crate::ServerConnection;
use log::{debug, info};
use shared::bus::{Subscription, Waiter};
use shared::connection::CloseEvent;
use shared::frame::CLOSE_NORMAL;
use shared::message::{decode_all_keys, decode_key, decode_seed, encode_is_host};
use shared::{ClientHeader, IdentityKey, ServerHeader};
use tokio::task::JoinHandle;

/// What every member receives when the host starts the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStart {
    /// Member keys in lobby order
    pub keys: Vec<IdentityKey>,
    pub seed: u32,
}

/// Message streams consumed by the running game.
pub struct GameStreams {
    pub keys: Subscription,
    pub times: Subscription,
    pub states: Subscription,
}

pub struct Session {
    server: ServerConnection,
    transport: JoinHandle<CloseEvent>,
    all_keys: Option<Waiter>,
    seed: Option<Waiter>,
    streams: GameStreams,
}

impl Session {
    /// Connects, runs the greeting exchange, and learns this client's key.
    ///
    /// Waits for the start messages and the game streams are registered
    /// before the transport starts, since a lobby may start at any point
    /// after joining.
    pub async fn establish(addr: &str) -> Result<Self, ClientError> {
        let (transport, server) = connect(addr).await?;
        let cancel = server.cancel_token();

        let ok = server.once(ServerHeader::Ok);
        let your_key = server.once(ServerHeader::YourSocketKey);
        let all_keys = server.once(ServerHeader::AllSocketKeys);
        let seed = server.once(ServerHeader::RandomSeed);
        let streams = GameStreams {
            keys: server.bus().subscribe(ServerHeader::Keys),
            times: server.bus().subscribe(ServerHeader::GameStateTime),
            states: server.bus().subscribe(ServerHeader::GameState),
        };
        let transport = tokio::spawn(transport.run());

        ok.recv(&cancel).await?;
        server.send(ClientHeader::Ok, &[]);

        let assigned = decode_key("YOURSOCKETKEY", &your_key.recv(&cancel).await?)?;
        if &assigned != server.key() {
            return Err(ClientError::KeyMismatch {
                offered: server.key().to_string(),
                assigned: assigned.to_string(),
            });
        }
        debug!("Server confirmed key {}", assigned);

        Ok(Self {
            server,
            transport,
            all_keys: Some(all_keys),
            seed: Some(seed),
            streams,
        })
    }

    pub fn key(&self) -> &IdentityKey {
        self.server.key()
    }

    pub fn server(&self) -> &ServerConnection {
        &self.server
    }

    /// Sends `header` and waits for the server's `OK`.
    async fn request(&self, header: ClientHeader, body: &[u8]) -> Result<(), ClientError> {
        let ok = self.server.once(ServerHeader::Ok);
        self.server.send(header, body);
        ok.recv(&self.server.cancel_token()).await?;
        Ok(())
    }

    /// Creates a lobby keyed by this client's identity key.
    pub async fn host(&self) -> Result<(), ClientError> {
        self.request(ClientHeader::IsHost, &encode_is_host(true)).await?;
        info!("Hosting lobby {}", self.key());
        Ok(())
    }

    /// Tells the server this client wants to join a lobby.
    pub async fn declare_joiner(&self) -> Result<(), ClientError> {
        self.request(ClientHeader::IsHost, &encode_is_host(false)).await
    }

    /// Asks to join `lobby`. May be repeated after a rejection.
    pub async fn request_join(&self, lobby: &IdentityKey) -> Result<JoinOutcome, ClientError> {
        let cancel = self.server.cancel_token();
        let ok = self.server.once(ServerHeader::Ok);
        let not_exist = self.server.once(ServerHeader::LobbyNotExist);
        let not_accept = self.server.once(ServerHeader::LobbyNotAccept);
        self.server.send(ClientHeader::JoinLobby, lobby.as_bytes());

        let outcome = tokio::select! {
            reply = ok.recv(&cancel) => reply.map(|_| JoinOutcome::Joined),
            reply = not_exist.recv(&cancel) => reply.map(|_| JoinOutcome::LobbyNotExist),
            reply = not_accept.recv(&cancel) => reply.map(|_| JoinOutcome::LobbyNotAccept),
        }?;

        info!("Join of lobby {}: {:?}", lobby, outcome);
        Ok(outcome)
    }

    /// Declares join intent and asks to join `lobby` once.
    pub async fn join(&self, lobby: &IdentityKey) -> Result<JoinOutcome, ClientError> {
        self.declare_joiner().await?;
        self.request_join(lobby).await
    }

    /// Host only: starts the lobby.
    pub async fn start_game(&self) -> Result<(), ClientError> {
        self.request(ClientHeader::StartGame, &[]).await?;
        info!("Lobby {} started", self.key());
        Ok(())
    }

    /// Waits for the member keys and the seed sent when the lobby starts.
    pub async fn await_start(&mut self) -> Result<GameStart, ClientError> {
        let cancel = self.server.cancel_token();
        let (Some(all_keys), Some(seed)) = (self.all_keys.take(), self.seed.take()) else {
            return Err(ClientError::NotStarted);
        };

        let keys = decode_all_keys(&all_keys.recv(&cancel).await?)?;
        let seed = decode_seed(&seed.recv(&cancel).await?)?;
        info!("Game starting with {} players (seed {})", keys.len(), seed);
        Ok(GameStart { keys, seed })
    }

    pub fn into_parts(self) -> (ServerConnection, GameStreams, JoinHandle<CloseEvent>) {
        (self.server, self.streams, self.transport)
    }

    /// Runs the close handshake and waits for the transport to finish.
    pub async fn close(self) -> Result<CloseEvent, ClientError> {
        self.server.close(CLOSE_NORMAL, "bye");
        self.transport.await.map_err(|_| ClientError::Disconnected)
    }
}
