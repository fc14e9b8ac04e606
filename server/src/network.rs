//! TCP accept loop and per-connection setup.

use crate::config::ServerConfig;
use crate::lobby::LobbyManager;
use crate::session::run_session;
use crate::{ClientConnection, SharedLobbies};
use log::{debug, error, info, warn};
use shared::connection::Connection;
use shared::frame::{Role, CLOSE_POLICY_VIOLATION};
use shared::handshake::{
    bad_request_response, parse_upgrade_request, read_http_head, upgrade_required_response, upgrade_response,
    HandshakeError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    lobbies: SharedLobbies,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(&config.addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            config,
            lobbies: Arc::new(RwLock::new(LobbyManager::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn lobbies(&self) -> SharedLobbies {
        Arc::clone(&self.lobbies)
    }

    /// Accepts connections forever, one task per connection.
    pub async fn run(self) -> Result<(), std::io::Error> {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };

            let lobbies = Arc::clone(&self.lobbies);
            let config = self.config.clone();
            tokio::spawn(async move {
                handle_connection(stream, addr, lobbies, config).await;
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, lobbies: SharedLobbies, config: ServerConfig) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let (head, leftover) = match read_http_head(&mut stream).await {
        Ok(read) => read,
        Err(e) => {
            debug!("Handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let key = match parse_upgrade_request(&head) {
        Ok(key) => key,
        Err(e) => {
            warn!("Rejected handshake from {}: {}", addr, e);
            let response = match e {
                HandshakeError::NotUpgrade => upgrade_required_response(),
                _ => bad_request_response(),
            };
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                debug!("Could not answer {}: {}", addr, e);
            }
            let _ = stream.shutdown().await;
            return;
        }
    };

    if let Err(e) = stream.write_all(upgrade_response(&key).as_bytes()).await {
        debug!("Could not complete handshake with {}: {}", addr, e);
        return;
    }
    info!("Client {} connected from {}", key, addr);

    let (connection, client): (_, ClientConnection) = Connection::new(stream, Role::Server, key.clone(), leftover);

    if let Err(e) = lobbies.write().await.enqueue(client.clone()) {
        warn!("Closing {} from {}: {}", key, addr, e);
        client.close(CLOSE_POLICY_VIOLATION, "identity key already in use");
        connection.run().await;
        return;
    }

    let session = {
        let client = client.clone();
        let lobbies = Arc::clone(&lobbies);
        tokio::spawn(async move {
            if let Err(e) = run_session(client.clone(), lobbies, config).await {
                debug!("Session of {} ended: {}", client.key(), e);
            }
        })
    };

    let event = connection.run().await;
    debug!("Client {} disconnected ({})", key, event.code);

    let state = lobbies.write().await.leave(&key);
    debug!("Client {} removed (was {:?})", key, state);

    if let Err(e) = session.await {
        error!("Session task of {} panicked: {}", key, e);
    }
}
