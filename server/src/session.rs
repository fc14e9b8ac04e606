//! Request/response flow of one client, from upgrade to game start.
//!
//! ```text
//! server            client
//!   OK        ->
//!             <-    OK
//!   YOURSOCKETKEY ->
//!             <-    ISHOST (1 = host, 0 = join)
//!
//! host:  OK -> ; <- STARTGAME ; OK -> ; lobby starts
//! join:  OK -> ; <- JOINLOBBY key ; OK | LOBBYNOTEXIST | LOBBYNOTACCEPT ->
//!        (a rejected joiner may send JOINLOBBY again)
//! ```
//!
//! Every wait is registered before the message that provokes the reply is
//! sent, and every wait is cancelled when the connection closes. A client
//! that cannot host is closed with 1008.

use crate::config::ServerConfig;
use crate::game;
use crate::lobby::SessionError;
use crate::{ClientConnection, SharedLobbies};
use log::{debug, info, warn};
use shared::frame::CLOSE_POLICY_VIOLATION;
use shared::message::{decode_is_host, decode_key};
use shared::{ClientHeader, ServerHeader};

/// Runs the session flow for `client` until it is placed in a lobby.
pub async fn run_session(
    client: ClientConnection,
    lobbies: SharedLobbies,
    config: ServerConfig,
) -> Result<(), SessionError> {
    let cancel = client.cancel_token();

    let ok = client.once(ClientHeader::Ok);
    client.send(ServerHeader::Ok, &[]);
    ok.recv(&cancel).await?;

    let is_host = client.once(ClientHeader::IsHost);
    client.send(ServerHeader::YourSocketKey, client.key().as_bytes());
    let body = is_host.recv(&cancel).await?;

    if decode_is_host(&body)? {
        host(&client, &lobbies, &config).await
    } else {
        join(&client, &lobbies).await
    }
}

async fn host(client: &ClientConnection, lobbies: &SharedLobbies, config: &ServerConfig) -> Result<(), SessionError> {
    let cancel = client.cancel_token();
    let key = client.key().clone();

    if let Err(e) = lobbies.write().await.host(&key) {
        warn!("Client {} cannot host: {}", key, e);
        client.close(CLOSE_POLICY_VIOLATION, "lobby key already in use");
        return Err(e);
    }

    let start = client.once(ClientHeader::StartGame);
    client.send(ServerHeader::Ok, &[]);
    start.recv(&cancel).await?;

    let members = lobbies.write().await.start(&key)?;
    client.send(ServerHeader::Ok, &[]);

    let task = game::start_lobby(&key, members, config);
    lobbies.write().await.attach_game(&key, task);
    Ok(())
}

async fn join(client: &ClientConnection, lobbies: &SharedLobbies) -> Result<(), SessionError> {
    let cancel = client.cancel_token();
    let key = client.key().clone();

    let mut request = client.once(ClientHeader::JoinLobby);
    client.send(ServerHeader::Ok, &[]);

    loop {
        let body = request.recv(&cancel).await?;
        request = client.once(ClientHeader::JoinLobby);

        let lobby_key = match decode_key("JOINLOBBY", &body) {
            Ok(lobby_key) => lobby_key,
            Err(e) => {
                debug!("Client {} sent an unusable lobby key: {}", key, e);
                client.send(ServerHeader::LobbyNotExist, &[]);
                continue;
            }
        };

        let result = lobbies.write().await.join(&key, &lobby_key);
        match result {
            Ok(()) => {
                client.send(ServerHeader::Ok, &[]);
                return Ok(());
            }
            Err(SessionError::LobbyNotFound) => {
                info!("Client {} asked for unknown lobby {}", key, lobby_key);
                client.send(ServerHeader::LobbyNotExist, &[]);
            }
            Err(SessionError::LobbyNotAccepting) => {
                client.send(ServerHeader::LobbyNotAccept, &[]);
            }
            Err(e) => {
                warn!("Join of {} failed: {}", key, e);
                return Err(e);
            }
        }
    }
}
