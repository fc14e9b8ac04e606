//! HTTP upgrade handshake for both ends of a connection.

use crate::frame::accept_token;
use crate::key::IdentityKey;
use log::debug;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the size of a request or response head.
const MAX_HEAD_LEN: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("request has no Sec-WebSocket-Key header")]
    MissingKey,
    #[error("Sec-WebSocket-Key is not a valid identity key: {0}")]
    InvalidKey(String),
    #[error("request is not an upgrade request")]
    NotUpgrade,
    #[error("malformed handshake: {0}")]
    Malformed(&'static str),
    #[error("server returned a wrong accept token")]
    BadAccept,
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads from `stream` until the end of an HTTP head (`\r\n\r\n`).
///
/// Returns the head as text and any bytes read past it, which belong to the
/// first frames of the connection.
pub async fn read_http_head<S>(stream: &mut S) -> Result<(String, Vec<u8>), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let leftover = buf.split_off(end);
            let head = String::from_utf8(buf).map_err(|_| HandshakeError::Malformed("head is not UTF-8"))?;
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(HandshakeError::Malformed("head too long"));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::Malformed("connection closed during handshake"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

fn header_has_token(head: &str, name: &str, token: &str) -> bool {
    header(head, name)
        .map(|value| value.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

/// Validates a client's upgrade request and returns its key.
pub fn parse_upgrade_request(head: &str) -> Result<IdentityKey, HandshakeError> {
    let request_line = head.lines().next().ok_or(HandshakeError::Malformed("empty request"))?;
    if !request_line.starts_with("GET ") {
        return Err(HandshakeError::NotUpgrade);
    }
    if !header_has_token(head, "Upgrade", "websocket") || !header_has_token(head, "Connection", "upgrade") {
        return Err(HandshakeError::NotUpgrade);
    }

    let key = header(head, "Sec-WebSocket-Key").ok_or(HandshakeError::MissingKey)?;
    IdentityKey::new(key).map_err(|e| HandshakeError::InvalidKey(e.to_string()))
}

pub fn upgrade_response(key: &IdentityKey) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_token(key.as_str())
    )
}

/// Response for plain HTTP requests that did not ask for an upgrade.
pub fn upgrade_required_response() -> &'static str {
    "HTTP/1.1 426 Upgrade Required\r\n\
     Upgrade: websocket\r\n\
     Connection: close\r\n\
     Content-Length: 0\r\n\r\n"
}

pub fn bad_request_response() -> &'static str {
    "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
}

pub fn upgrade_request(host: &str, key: &IdentityKey) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        host, key
    )
}

/// Checks the server's answer to [`upgrade_request`].
pub fn verify_upgrade_response(head: &str, key: &IdentityKey) -> Result<(), HandshakeError> {
    let status = head.lines().next().ok_or(HandshakeError::Malformed("empty response"))?;
    if status.split_whitespace().nth(1) != Some("101") {
        debug!("Upgrade refused: {}", status);
        return Err(HandshakeError::NotUpgrade);
    }

    match header(head, "Sec-WebSocket-Accept") {
        Some(token) if token == accept_token(key.as_str()) => Ok(()),
        _ => Err(HandshakeError::BadAccept),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request() -> String {
        "GET /chat HTTP/1.1\r\n\
         Host: server.example.com\r\n\
         Upgrade: websocket\r\n\
         Connection: keep-alive, Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
            .to_string()
    }

    #[test]
    fn test_parse_upgrade_request() {
        let key = parse_upgrade_request(&request()).unwrap();
        assert_eq!(key.as_str(), KEY);
    }

    #[test]
    fn test_reject_plain_request() {
        let head = "GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(parse_upgrade_request(head), Err(HandshakeError::NotUpgrade)));
    }

    #[test]
    fn test_reject_missing_or_bad_key() {
        let missing = request().replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        assert!(matches!(parse_upgrade_request(&missing), Err(HandshakeError::MissingKey)));

        let short = request().replace(KEY, "abc");
        assert!(matches!(parse_upgrade_request(&short), Err(HandshakeError::InvalidKey(_))));
    }

    #[test]
    fn test_response_verifies() {
        let key = IdentityKey::new(KEY).unwrap();
        let response = upgrade_response(&key);
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
        assert!(verify_upgrade_response(&response, &key).is_ok());

        let other = IdentityKey::new("AAAAAAAAAAAAAAAAAAAAAA==").unwrap();
        assert!(matches!(
            verify_upgrade_response(&response, &other),
            Err(HandshakeError::BadAccept)
        ));
        assert!(matches!(
            verify_upgrade_response(upgrade_required_response(), &key),
            Err(HandshakeError::NotUpgrade)
        ));
    }

    #[test]
    fn test_client_request_is_accepted_by_server_parser() {
        let key = IdentityKey::new(KEY).unwrap();
        assert_eq!(parse_upgrade_request(&upgrade_request("localhost:8000", &key)).unwrap(), key);
    }

    #[tokio::test]
    async fn test_read_http_head_keeps_leftover() {
        let mut data = request().into_bytes();
        data.extend_from_slice(&[0x82, 0x80]);
        let mut stream = tokio_test::io::Builder::new()
            .read(&data[..20])
            .read(&data[20..])
            .build();

        let (head, leftover) = read_http_head(&mut stream).await.unwrap();
        assert_eq!(head, request());
        assert_eq!(leftover, vec![0x82, 0x80]);
    }

    #[tokio::test]
    async fn test_read_http_head_eof() {
        let mut stream = tokio_test::io::Builder::new().read(b"GET / HTTP/1.1\r\n").build();
        assert!(matches!(
            read_http_head(&mut stream).await,
            Err(HandshakeError::Malformed(_))
        ));
    }
}
