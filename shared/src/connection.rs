//! The task driving one upgraded connection.
//!
//! [`Connection::run`] owns the stream. It reads and decodes frames, answers
//! pings, runs the close handshake, and feeds binary messages into the
//! connection's [`MessageBus`]. Everything else talks to it through a
//! cloneable [`ConnectionHandle`].

use crate::bus::{cancel_pair, CancelToken, Canceller, MessageBus, Waiter};
use crate::frame::{
    close_payload, encode_frame, parse_close_payload, Frame, FrameDecoder, FrameError, Opcode, ReadyState,
    Role, CLOSE_NORMAL,
};
use crate::key::IdentityKey;
use crate::message::{decode_message, encode_message, Header};
use log::{debug, info, trace, warn};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Reported when the peer closes without a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Reported when the stream ends without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// How long to wait for the peer's echo after sending a close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Message(Vec<u8>),
    Close { code: u16, reason: String },
}

pub struct Connection<S, In: Header> {
    stream: S,
    role: Role,
    key: IdentityKey,
    state: ReadyState,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    bus: MessageBus<In>,
    canceller: Canceller,
    close_deadline: Option<Instant>,
}

/// Sends messages with `Out` headers and receives messages with `In` headers.
pub struct ConnectionHandle<In: Header, Out: Header> {
    key: IdentityKey,
    outbound: mpsc::UnboundedSender<Outbound>,
    bus: MessageBus<In>,
    cancel: CancelToken,
    _out: PhantomData<fn(Out)>,
}

impl<In: Header, Out: Header> Clone for ConnectionHandle<In, Out> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            outbound: self.outbound.clone(),
            bus: self.bus.clone(),
            cancel: self.cancel.clone(),
            _out: PhantomData,
        }
    }
}

impl<S, In> Connection<S, In>
where
    S: AsyncRead + AsyncWrite + Unpin,
    In: Header,
{
    /// Wraps an already upgraded stream.
    ///
    /// `leftover` holds bytes read past the handshake, which are decoded before
    /// anything new is read from the stream.
    pub fn new<Out: Header>(
        stream: S,
        role: Role,
        key: IdentityKey,
        leftover: Vec<u8>,
    ) -> (Self, ConnectionHandle<In, Out>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (canceller, cancel) = cancel_pair();
        let bus = MessageBus::new();

        let handle = ConnectionHandle {
            key: key.clone(),
            outbound: outbound_tx,
            bus: bus.clone(),
            cancel,
            _out: PhantomData,
        };

        let connection = Self {
            stream,
            role,
            key,
            state: ReadyState::Open,
            decoder: FrameDecoder::new(role),
            read_buf: leftover,
            outbound: outbound_rx,
            bus,
            canceller,
            close_deadline: None,
        };

        (connection, handle)
    }

    /// Runs until the connection closes, then tears it down.
    ///
    /// Teardown closes the message bus and fires the cancel token, so every
    /// pending wait on this connection is abandoned.
    pub async fn run(mut self) -> CloseEvent {
        let event = self.drive().await;

        self.state = ReadyState::Closed;
        self.bus.close();
        self.canceller.cancel();
        if let Err(e) = self.stream.shutdown().await {
            trace!("Shutdown of {} failed: {}", self.key, e);
        }

        info!("Connection {} closed ({}: {})", self.key, event.code, event.reason);
        event
    }

    async fn drive(&mut self) -> CloseEvent {
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            loop {
                match self.decoder.decode_next(&mut self.read_buf) {
                    Ok(Some(frame)) => {
                        if let Some(event) = self.handle_frame(frame).await {
                            return event;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return self.fail(e).await,
                }
            }

            let closing = self.state == ReadyState::Closing;
            let deadline = self.close_deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                read = self.stream.read(&mut chunk) => match read {
                    Ok(0) => return CloseEvent::new(CLOSE_ABNORMAL, "stream ended"),
                    Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                    Err(e) => return CloseEvent::new(CLOSE_ABNORMAL, e.to_string()),
                },
                outbound = self.outbound.recv(), if !closing => {
                    let result = match outbound {
                        Some(Outbound::Message(data)) => self.write_frame(Opcode::Binary, &data).await,
                        Some(Outbound::Close { code, reason }) => self.start_close(code, &reason).await,
                        None => self.start_close(CLOSE_NORMAL, "").await,
                    };
                    if let Err(e) = result {
                        return CloseEvent::new(CLOSE_ABNORMAL, e.to_string());
                    }
                },
                _ = tokio::time::sleep_until(deadline), if closing => {
                    debug!("Close handshake with {} timed out", self.key);
                    return CloseEvent::new(CLOSE_ABNORMAL, "close handshake timed out");
                },
            }
        }
    }

    /// Handles one frame. Returns the close event when the frame ends the connection.
    async fn handle_frame(&mut self, frame: Frame) -> Option<CloseEvent> {
        match frame.opcode {
            Opcode::Binary => {
                match decode_message::<In>(&frame.payload) {
                    Ok((header, body)) => {
                        trace!("{} -> {:?} ({} bytes)", self.key, header, body.len());
                        self.bus.dispatch(header, body.to_vec());
                    }
                    Err(e) => warn!("Dropping message from {}: {}", self.key, e),
                }
                None
            }
            Opcode::Text => {
                debug!("Ignoring text frame from {}", self.key);
                None
            }
            Opcode::Ping => match self.write_frame(Opcode::Pong, &frame.payload).await {
                Ok(()) => None,
                Err(e) => Some(CloseEvent::new(CLOSE_ABNORMAL, e.to_string())),
            },
            Opcode::Pong => None,
            Opcode::Close => {
                let (code, reason) = parse_close_payload(&frame.payload);
                if self.state == ReadyState::Open {
                    let echo = close_payload(code.unwrap_or(CLOSE_NORMAL), &reason);
                    if let Err(e) = self.write_frame(Opcode::Close, &echo).await {
                        debug!("Could not echo close to {}: {}", self.key, e);
                    }
                }
                Some(CloseEvent::new(code.unwrap_or(CLOSE_NO_STATUS), reason))
            }
        }
    }

    /// Ends the connection after a protocol violation.
    async fn fail(&mut self, error: FrameError) -> CloseEvent {
        let code = error.close_code();
        warn!("Protocol violation from {}: {} (closing with {})", self.key, error, code);
        let reason = error.to_string();
        if let Err(e) = self.write_frame(Opcode::Close, &close_payload(code, &reason)).await {
            debug!("Could not send close to {}: {}", self.key, e);
        }
        CloseEvent::new(code, reason)
    }

    async fn start_close(&mut self, code: u16, reason: &str) -> std::io::Result<()> {
        debug!("Closing {} with {}", self.key, code);
        self.state = ReadyState::Closing;
        self.close_deadline = Some(Instant::now() + CLOSE_TIMEOUT);
        self.write_frame(Opcode::Close, &close_payload(code, reason)).await
    }

    async fn write_frame(&mut self, opcode: Opcode, payload: &[u8]) -> std::io::Result<()> {
        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        let bytes = match encode_frame(opcode, payload, mask) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Not sending {:?} frame to {}: {}", opcode, self.key, e);
                return Ok(());
            }
        };
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }
}

impl<In: Header, Out: Header> ConnectionHandle<In, Out> {
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn bus(&self) -> &MessageBus<In> {
        &self.bus
    }

    /// Cancelled once the connection has closed.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn once(&self, header: In) -> Waiter {
        self.bus.once(header)
    }

    /// Queues a message. Fire-and-forget: returns `false` if the connection is gone.
    pub fn send(&self, header: Out, body: &[u8]) -> bool {
        self.outbound
            .send(Outbound::Message(encode_message(header, body)))
            .is_ok()
    }

    /// Starts the close handshake.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed() || self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CLOSE_PROTOCOL_ERROR, CLOSE_TOO_LARGE};
    use crate::message::{ClientHeader, ServerHeader};
    use tokio_test::io::Builder;

    const MASK: [u8; 4] = [1, 2, 3, 4];

    fn key() -> IdentityKey {
        IdentityKey::new("dGhlIHNhbXBsZSBub25jZQ==").unwrap()
    }

    fn masked(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        encode_frame(opcode, payload, Some(MASK)).unwrap()
    }

    fn plain(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        encode_frame(opcode, payload, None).unwrap()
    }

    type ServerSide<S> = (Connection<S, ClientHeader>, ConnectionHandle<ClientHeader, ServerHeader>);

    fn server_side<S: AsyncRead + AsyncWrite + Unpin>(stream: S) -> ServerSide<S> {
        Connection::new(stream, Role::Server, key(), Vec::new())
    }

    #[tokio::test]
    async fn test_peer_close_is_echoed() {
        let close = close_payload(CLOSE_NORMAL, "bye");
        let stream = Builder::new()
            .read(&masked(Opcode::Close, &close))
            .write(&plain(Opcode::Close, &close))
            .build();
        let (connection, _handle) = server_side(stream);

        let event = connection.run().await;
        assert_eq!(event, CloseEvent::new(CLOSE_NORMAL, "bye"));
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let stream = Builder::new()
            .read(&masked(Opcode::Ping, b"hi"))
            .write(&plain(Opcode::Pong, b"hi"))
            .read(&masked(Opcode::Close, &[]))
            .write(&plain(Opcode::Close, &close_payload(CLOSE_NORMAL, "")))
            .build();
        let (connection, _handle) = server_side(stream);

        let event = connection.run().await;
        assert_eq!(event.code, CLOSE_NO_STATUS);
    }

    #[tokio::test]
    async fn test_unmasked_frame_closes_with_protocol_error() {
        let reason = FrameError::Unmasked.to_string();
        let stream = Builder::new()
            .read(&plain(Opcode::Binary, &[0]))
            .write(&plain(Opcode::Close, &close_payload(CLOSE_PROTOCOL_ERROR, &reason)))
            .build();
        let (connection, handle) = server_side(stream);
        let token = handle.cancel_token();

        let event = connection.run().await;
        assert_eq!(event.code, CLOSE_PROTOCOL_ERROR);
        assert!(token.is_cancelled());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_with_too_large() {
        let reason = FrameError::TooLarge.to_string();
        let stream = Builder::new()
            .read(&[0x82, 0xff])
            .write(&plain(Opcode::Close, &close_payload(CLOSE_TOO_LARGE, &reason)))
            .build();
        let (connection, _handle) = server_side(stream);

        assert_eq!(connection.run().await.code, CLOSE_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_binary_message_reaches_waiter() {
        let message = encode_message(ClientHeader::IsHost, &[1]);
        let stream = Builder::new()
            .read(&masked(Opcode::Binary, &message))
            .read(&masked(Opcode::Close, &close_payload(CLOSE_NORMAL, "")))
            .write(&plain(Opcode::Close, &close_payload(CLOSE_NORMAL, "")))
            .build();
        let (connection, handle) = server_side(stream);
        let waiter = handle.once(ClientHeader::IsHost);
        let token = handle.cancel_token();

        let (event, body) = tokio::join!(connection.run(), waiter.recv(&token));
        assert_eq!(event.code, CLOSE_NORMAL);
        assert_eq!(body, Ok(vec![1]));
    }

    #[tokio::test]
    async fn test_server_message_sent_unmasked() {
        let message = encode_message(ServerHeader::YourSocketKey, key().as_bytes());
        let stream = Builder::new()
            .write(&plain(Opcode::Binary, &message))
            .read(&masked(Opcode::Close, &close_payload(CLOSE_NORMAL, "")))
            .write(&plain(Opcode::Close, &close_payload(CLOSE_NORMAL, "")))
            .build();
        let (connection, handle) = server_side(stream);

        assert!(handle.send(ServerHeader::YourSocketKey, key().as_bytes()));
        assert_eq!(connection.run().await.code, CLOSE_NORMAL);
        assert!(!handle.send(ServerHeader::Ok, &[]));
    }

    #[tokio::test]
    async fn test_local_close_waits_for_echo_without_replying() {
        let close = close_payload(1008, "duplicate key");
        let stream = Builder::new()
            .write(&plain(Opcode::Close, &close))
            .read(&masked(Opcode::Close, &close))
            .build();
        let (connection, handle) = server_side(stream);

        handle.close(1008, "duplicate key");
        let event = connection.run().await;
        assert_eq!(event, CloseEvent::new(1008, "duplicate key"));
    }
}
