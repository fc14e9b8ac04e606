//! Client end of the transport: upgrade request and masked frames.

use crate::error::ClientError;
use crate::ServerConnection;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use shared::connection::Connection;
use shared::frame::Role;
use shared::handshake::{read_http_head, upgrade_request, verify_upgrade_response};
use shared::{IdentityKey, ServerHeader};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub type ClientTransport = Connection<TcpStream, ServerHeader>;

/// A random 16-byte nonce, base64 encoded to exactly 24 characters.
pub fn generate_key() -> Result<IdentityKey, ClientError> {
    let nonce: [u8; 16] = rand::random();
    Ok(IdentityKey::new(STANDARD.encode(nonce))?)
}

/// Opens a TCP connection to `addr` and performs the upgrade handshake.
///
/// The returned transport is not running yet; register any waits on the
/// handle before spawning [`Connection::run`], so no early message is missed.
pub async fn connect(addr: &str) -> Result<(ClientTransport, ServerConnection), ClientError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let key = generate_key()?;
    stream.write_all(upgrade_request(addr, &key).as_bytes()).await?;

    let (head, leftover) = read_http_head(&mut stream).await?;
    verify_upgrade_response(&head, &key)?;
    info!("Connected to {} as {}", addr, key);
    debug!("{} bytes arrived with the handshake response", leftover.len());

    Ok(Connection::new(stream, Role::Client, key, leftover))
}
