//! Per-connection registry routing decoded messages to whoever waits for them.
//!
//! A connection task owns the sending side: it calls [`MessageBus::dispatch`]
//! for every decoded message and [`MessageBus::close`] when the connection
//! ends. Session code registers interest ahead of time:
//!
//! - [`MessageBus::once`] for a single reply to a request. Register the waiter
//!   before sending the request, otherwise a fast reply can be missed.
//! - [`MessageBus::subscribe`] for a stream of one header.
//! - [`MessageBus::subscribe_all`] for every message regardless of header.

use crate::message::Header;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("connection closed while waiting")]
    Closed,
    #[error("wait cancelled")]
    Cancelled,
}

pub type Subscription = mpsc::UnboundedReceiver<Vec<u8>>;
pub type WildcardSubscription<H> = mpsc::UnboundedReceiver<(H, Vec<u8>)>;

struct Registry<H: Header> {
    waiters: HashMap<H, Vec<oneshot::Sender<Vec<u8>>>>,
    subscribers: HashMap<H, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    wildcard: Vec<mpsc::UnboundedSender<(H, Vec<u8>)>>,
    closed: bool,
}

pub struct MessageBus<H: Header> {
    registry: Arc<Mutex<Registry<H>>>,
}

impl<H: Header> Clone for MessageBus<H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<H: Header> Default for MessageBus<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Header> MessageBus<H> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                waiters: HashMap::new(),
                subscribers: HashMap::new(),
                wildcard: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<H>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a single-shot wait for the next message with `header`.
    pub fn once(&self, header: H) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();
        if !registry.closed {
            registry.waiters.entry(header).or_default().push(tx);
        }
        Waiter { rx }
    }

    /// Receives the body of every future message with `header`.
    pub fn subscribe(&self, header: H) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        if !registry.closed {
            registry.subscribers.entry(header).or_default().push(tx);
        }
        rx
    }

    /// Receives every future message.
    pub fn subscribe_all(&self) -> WildcardSubscription<H> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        if !registry.closed {
            registry.wildcard.push(tx);
        }
        rx
    }

    /// Delivers one decoded message to every interested party.
    ///
    /// Returns how many receivers got it.
    pub fn dispatch(&self, header: H, body: Vec<u8>) -> usize {
        let mut registry = self.lock();
        if registry.closed {
            return 0;
        }
        let mut delivered = 0;

        if let Some(waiters) = registry.waiters.remove(&header) {
            for waiter in waiters {
                if waiter.send(body.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        if let Some(subscribers) = registry.subscribers.get_mut(&header) {
            subscribers.retain(|tx| tx.send(body.clone()).is_ok());
            delivered += subscribers.len();
        }

        registry.wildcard.retain(|tx| tx.send((header, body.clone())).is_ok());
        delivered += registry.wildcard.len();

        delivered
    }

    /// Drops every registration. Pending waiters resolve to [`WaitError::Closed`]
    /// and subscriptions end.
    pub fn close(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        registry.waiters.clear();
        registry.subscribers.clear();
        registry.wildcard.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A pending single-shot wait from [`MessageBus::once`].
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<Vec<u8>>,
}

impl Waiter {
    /// Waits for the message body, giving up when `cancel` fires.
    pub async fn recv(self, cancel: &CancelToken) -> Result<Vec<u8>, WaitError> {
        let mut cancel = cancel.clone();
        tokio::select! {
            biased;
            body = self.rx => body.map_err(|_| WaitError::Closed),
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
        }
    }
}

/// Fires every [`CancelToken`] created from it.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

/// Observes a [`Canceller`]. Dropping the canceller counts as cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (Canceller, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelToken { rx })
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientHeader;

    #[tokio::test]
    async fn test_once_receives_single_message() {
        let bus = MessageBus::new();
        let (_canceller, token) = cancel_pair();
        let waiter = bus.once(ClientHeader::Ok);

        assert_eq!(bus.dispatch(ClientHeader::IsHost, vec![1]), 0);
        assert_eq!(bus.dispatch(ClientHeader::Ok, vec![7]), 1);
        assert_eq!(bus.dispatch(ClientHeader::Ok, vec![8]), 0);

        assert_eq!(waiter.recv(&token).await, Ok(vec![7]));
    }

    #[tokio::test]
    async fn test_subscribers_and_wildcard() {
        let bus = MessageBus::new();
        let mut keys = bus.subscribe(ClientHeader::Keys);
        let mut all = bus.subscribe_all();

        assert_eq!(bus.dispatch(ClientHeader::Keys, vec![0]), 2);
        assert_eq!(bus.dispatch(ClientHeader::StartGame, vec![]), 1);

        assert_eq!(keys.recv().await, Some(vec![0]));
        assert_eq!(all.recv().await, Some((ClientHeader::Keys, vec![0])));
        assert_eq!(all.recv().await, Some((ClientHeader::StartGame, vec![])));
    }

    #[tokio::test]
    async fn test_close_resolves_waiters() {
        let bus: MessageBus<ClientHeader> = MessageBus::new();
        let (_canceller, token) = cancel_pair();
        let waiter = bus.once(ClientHeader::StartGame);
        let mut keys = bus.subscribe(ClientHeader::Keys);

        bus.close();

        assert_eq!(waiter.recv(&token).await, Err(WaitError::Closed));
        assert_eq!(keys.recv().await, None);
        assert!(bus.is_closed());

        let late = bus.once(ClientHeader::Ok);
        assert_eq!(late.recv(&token).await, Err(WaitError::Closed));
    }

    #[tokio::test]
    async fn test_cancel_abandons_wait() {
        let bus: MessageBus<ClientHeader> = MessageBus::new();
        let (canceller, token) = cancel_pair();
        let waiter = bus.once(ClientHeader::StartGame);

        let wait = tokio::spawn(async move { waiter.recv(&token).await });
        canceller.cancel();

        assert_eq!(wait.await.unwrap(), Err(WaitError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_canceller_cancels() {
        let (canceller, token) = cancel_pair();
        let mut observed = canceller.token();
        drop(canceller);
        observed.cancelled().await;
        assert!(!token.is_cancelled());
    }
}
