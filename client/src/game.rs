//! The client's predicted copy of the lobby simulation.
//!
//! The client advances its own [`Game`] every tick with its own held keys and
//! the keys the server relays for everyone else, then lets the
//! [`Reconciler`] check each authoritative snapshot against what it predicted.

use crate::error::ClientError;
use crate::input::InputSource;
use crate::reconcile::Reconciler;
use crate::rendering::Renderer;
use crate::session::{GameStart, GameStreams};
use crate::ServerConnection;
use log::{debug, info, warn};
use shared::message::{decode_key_records, decode_timestamp, encode_key_codes};
use shared::{
    default_tick_interval, now_millis, step_millis, ClientHeader, Game, IdentityKey, KeySet, KeyStates, Snapshot,
    BROADCAST_INTERVAL_MS,
};
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

/// Simulation and broadcast rates; must match the server's.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub tick_interval: Duration,
    pub broadcast_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
        }
    }
}

pub struct ClientGame<I: InputSource, R: Renderer> {
    server: ServerConnection,
    streams: GameStreams,
    game: Game,
    reconciler: Reconciler,
    input: I,
    renderer: R,
    /// Keys last reported to the server
    sent: KeySet,
    /// Latest relayed keys of the other members
    remote: KeyStates,
    timing: Timing,
    ticks: u64,
}

impl<I: InputSource, R: Renderer> ClientGame<I, R> {
    pub fn new(
        server: ServerConnection,
        streams: GameStreams,
        start: &GameStart,
        input: I,
        renderer: R,
        timing: Timing,
    ) -> Self {
        Self {
            server,
            streams,
            game: Game::new(&start.keys, start.seed),
            reconciler: Reconciler::new(),
            input,
            renderer,
            sent: KeySet::EMPTY,
            remote: KeyStates::new(),
            timing,
            ticks: 0,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn key(&self) -> &IdentityKey {
        self.server.key()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs the game loop until the connection closes or `limit` elapses.
    ///
    /// Returns `Ok` only when the limit is reached.
    pub async fn run(&mut self, limit: Option<Duration>) -> Result<(), ClientError> {
        let mut cancel = self.server.cancel_token();
        let mut tick = interval(self.timing.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;

        let deadline = limit.map(|limit| Instant::now() + limit);
        let mut pending_save: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Server connection closed after {} ticks", self.ticks);
                    return Err(ClientError::Disconnected);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let (confirmed, adopted) = self.reconciler.stats();
                    info!(
                        "Stopping after {} ticks ({} snapshots confirmed, {} adopted)",
                        self.ticks, confirmed, adopted
                    );
                    return Ok(());
                }
                _ = tick.tick() => self.step(),
                Some(body) = self.streams.keys.recv() => self.relayed_keys(&body),
                Some(body) = self.streams.times.recv() => {
                    pending_save = self.schedule_save(&body).or(pending_save);
                }
                _ = sleep_until(pending_save.unwrap_or_else(Instant::now)), if pending_save.is_some() => {
                    pending_save = None;
                    if let Err(e) = self.reconciler.save(&self.game) {
                        warn!("Cannot save local snapshot: {}", e);
                    }
                }
                Some(body) = self.streams.states.recv() => self.authoritative(&body),
            }
        }
    }

    /// One local simulation step.
    fn step(&mut self) {
        let held = self.input.held();
        if held != self.sent {
            self.server.send(ClientHeader::Keys, &encode_key_codes(&held));
            self.sent = held;
        }

        let mut states = self.remote.clone();
        states.insert(self.server.key().clone(), held);
        self.game.update(&states, step_millis(self.timing.tick_interval));
        self.ticks += 1;

        self.renderer.render(self.game.objects());
    }

    /// Our own record is skipped: local keys are applied without the round trip.
    fn relayed_keys(&mut self, body: &[u8]) {
        match decode_key_records(body) {
            Ok(mut records) => {
                records.remove(self.server.key().as_str());
                self.remote = records;
            }
            Err(e) => warn!("Dropping KEYS relay: {}", e),
        }
    }

    /// Returns when to save the local state for the snapshot that follows.
    fn schedule_save(&self, body: &[u8]) -> Option<Instant> {
        let sent_at = match decode_timestamp(body) {
            Ok(sent_at) => sent_at,
            Err(e) => {
                warn!("Dropping GAMESTATETIME: {}", e);
                return None;
            }
        };
        let ping = Duration::from_millis(now_millis().saturating_sub(sent_at));
        let delay = Reconciler::save_delay(ping, self.timing.broadcast_interval);
        debug!("Ping {:?}, saving local state in {:?}", ping, delay);
        Some(Instant::now() + delay)
    }

    fn authoritative(&mut self, body: &[u8]) {
        match Snapshot::decode(body) {
            Ok(snapshot) => {
                let outcome = self.reconciler.reconcile(&mut self.game, snapshot);
                self.renderer.reconciled(outcome, self.game.objects());
            }
            Err(e) => warn!("Dropping GAMESTATE: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::LogRenderer;
    use assert_approx_eq::assert_approx_eq;
    use shared::connection::Connection;
    use shared::frame::Role;
    use shared::message::{encode_key_records, encode_timestamp};
    use shared::{GameObject, ServerHeader};

    fn keys() -> Vec<IdentityKey> {
        vec![
            IdentityKey::new("A".repeat(24)).unwrap(),
            IdentityKey::new("B".repeat(24)).unwrap(),
        ]
    }

    fn client_game(held: KeySet) -> (ClientGame<KeySet, LogRenderer>, tokio::io::DuplexStream) {
        let (stream, peer) = tokio::io::duplex(4096);
        let (_transport, server): (_, ServerConnection) =
            Connection::new(stream, Role::Client, keys()[0].clone(), Vec::new());
        let streams = GameStreams {
            keys: server.bus().subscribe(ServerHeader::Keys),
            times: server.bus().subscribe(ServerHeader::GameStateTime),
            states: server.bus().subscribe(ServerHeader::GameState),
        };
        let start = GameStart { keys: keys(), seed: 3 };
        let game = ClientGame::new(server, streams, &start, held, LogRenderer::default(), Timing::default());
        (game, peer)
    }

    fn position(game: &ClientGame<KeySet, LogRenderer>, key: &IdentityKey) -> shared::Vector2 {
        game.game().player(key.as_str()).unwrap().body.position
    }

    #[tokio::test]
    async fn test_step_applies_local_keys_immediately() {
        let (mut game, _peer) = client_game(KeySet::parse("D").unwrap());
        let [own, other] = [keys()[0].clone(), keys()[1].clone()];
        let (own_start, other_start) = (position(&game, &own), position(&game, &other));

        for _ in 0..10 {
            game.step();
        }

        assert!(position(&game, &own).x > own_start.x);
        assert_approx_eq!(position(&game, &own).y, own_start.y);
        assert_approx_eq!(position(&game, &other).x, other_start.x);
        assert_eq!(game.sent, KeySet::parse("D").unwrap());
        assert_eq!(game.ticks(), 10);
    }

    #[tokio::test]
    async fn test_relayed_keys_skip_own_record() {
        let (mut game, _peer) = client_game(KeySet::parse("D").unwrap());
        let [own, other] = [keys()[0].clone(), keys()[1].clone()];
        let (own_start, other_start) = (position(&game, &own), position(&game, &other));

        let mut relayed = KeyStates::new();
        relayed.insert(own.clone(), KeySet::parse("A").unwrap());
        relayed.insert(other.clone(), KeySet::parse("S").unwrap());
        game.relayed_keys(&encode_key_records(&relayed));
        assert_eq!(game.remote.len(), 1);

        for _ in 0..5 {
            game.step();
        }

        // the stale relay of our own keys must not override local input
        assert!(position(&game, &own).x > own_start.x);
        assert!(position(&game, &other).y > other_start.y);
    }

    #[tokio::test]
    async fn test_authoritative_snapshot_is_adopted() {
        let (mut game, _peer) = client_game(KeySet::EMPTY);
        let own = keys()[0].clone();

        let objects: Vec<GameObject> = game
            .game()
            .objects()
            .iter()
            .cloned()
            .map(|object| match object {
                GameObject::Player(mut player) if player.key == own => {
                    player.body.position = shared::Vector2::new(1234.0, 567.0);
                    GameObject::Player(player)
                }
                other => other,
            })
            .collect();
        game.authoritative(&Snapshot::new(objects).encode().unwrap());

        assert_eq!(game.reconciler().stats(), (0, 1));
        assert_approx_eq!(position(&game, &own).x, 1234.0);
        assert_approx_eq!(position(&game, &own).y, 567.0);
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped() {
        let (mut game, _peer) = client_game(KeySet::EMPTY);
        let before = game.game().objects().to_vec();

        game.authoritative(&[0, 1, 9]);
        game.relayed_keys(&[1, 2, 3]);

        assert_eq!(game.game().objects(), before.as_slice());
        assert!(game.reconciler().authoritative().is_none());
        assert!(game.schedule_save(b"not a time").is_none());
        assert!(game.schedule_save(&encode_timestamp(now_millis())).is_some());
    }
}
