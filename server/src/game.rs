//! Authoritative simulation of a started lobby.
//!
//! Each started lobby gets one task that owns its [`Game`]. The task runs two
//! independent timers: a fast tick that relays held keys and advances the
//! simulation, and a slower broadcast that sends a timestamp followed by the
//! full snapshot.

use crate::config::ServerConfig;
use crate::ClientConnection;
use log::{debug, info, trace, warn};
use shared::message::{decode_key_codes, encode_all_keys, encode_key_records, encode_seed, encode_timestamp};
use shared::random::fresh_seed;
use shared::{now_millis, step_millis, ClientHeader, Game, IdentityKey, KeyStates, ServerHeader};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Ticks between two statistics lines in the debug log.
const STATS_EVERY: u64 = 600;

/// Starts a lobby's simulation
///
/// Subscribes to every member's `KEYS` messages, sends the ordered member
/// keys and a fresh seed to all members, then spawns the tick/broadcast task.
pub fn start_lobby(lobby_key: &IdentityKey, members: Vec<ClientConnection>, config: &ServerConfig) -> JoinHandle<()> {
    let keys: Vec<IdentityKey> = members.iter().map(|member| member.key().clone()).collect();
    let seed = fresh_seed();
    let lobby = LobbyGame::new(lobby_key.clone(), members, Game::new(&keys, seed), config);

    lobby.broadcast(ServerHeader::AllSocketKeys, &encode_all_keys(&keys));
    lobby.broadcast(ServerHeader::RandomSeed, &encode_seed(seed));
    info!("Lobby {} running with seed {}", lobby_key, seed);

    tokio::spawn(lobby.run())
}

pub struct LobbyGame {
    lobby_key: IdentityKey,
    members: Vec<ClientConnection>,
    game: Game,
    /// Latest held keys per member
    key_states: KeyStates,
    keys_rx: mpsc::UnboundedReceiver<(IdentityKey, Vec<u8>)>,
    tick_interval: Duration,
    broadcast_interval: Duration,
    ticks: u64,
}

impl LobbyGame {
    pub fn new(lobby_key: IdentityKey, members: Vec<ClientConnection>, game: Game, config: &ServerConfig) -> Self {
        let (keys_tx, keys_rx) = mpsc::unbounded_channel();

        // Funnel each member's KEYS stream into one channel tagged by sender.
        for member in &members {
            let mut subscription = member.bus().subscribe(ClientHeader::Keys);
            let key = member.key().clone();
            let keys_tx = keys_tx.clone();
            tokio::spawn(async move {
                while let Some(body) = subscription.recv().await {
                    if keys_tx.send((key.clone(), body)).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            lobby_key,
            members,
            game,
            key_states: KeyStates::new(),
            keys_rx,
            tick_interval: config.tick_interval,
            broadcast_interval: config.broadcast_interval,
            ticks: 0,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    fn broadcast(&self, header: ServerHeader, body: &[u8]) {
        for member in &self.members {
            member.send(header, body);
        }
    }

    fn connected(&self) -> bool {
        self.members.iter().any(|member| !member.is_closed())
    }

    /// Records a member's latest `KEYS` message.
    pub fn set_keys(&mut self, key: IdentityKey, body: &[u8]) {
        let keys = decode_key_codes(body);
        trace!("Lobby {}: {} holds {:?}", self.lobby_key, key, keys);
        self.key_states.insert(key, keys);
    }

    /// Relays every member's held keys, then advances the simulation one step.
    pub fn tick(&mut self) {
        let records = encode_key_records(&self.key_states);
        self.broadcast(ServerHeader::Keys, &records);

        self.game.update(&self.key_states, step_millis(self.tick_interval));
        self.ticks += 1;

        if self.ticks % STATS_EVERY == 0 {
            debug!(
                "Lobby {}: tick {}, {} objects, {} members connected",
                self.lobby_key,
                self.ticks,
                self.game.objects().len(),
                self.members.iter().filter(|member| !member.is_closed()).count()
            );
        }
    }

    /// Sends the current time followed by the authoritative snapshot.
    pub fn send_snapshot(&self) {
        match self.game.snapshot().encode() {
            Ok(snapshot) => {
                self.broadcast(ServerHeader::GameStateTime, &encode_timestamp(now_millis()));
                self.broadcast(ServerHeader::GameState, &snapshot);
            }
            Err(e) => warn!("Lobby {}: cannot encode snapshot: {}", self.lobby_key, e),
        }
    }

    pub async fn run(mut self) {
        let mut tick = interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut broadcast = interval(self.broadcast_interval);
        broadcast.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Both intervals fire immediately; skip that first tick.
        tick.tick().await;
        broadcast.tick().await;

        loop {
            tokio::select! {
                Some((key, body)) = self.keys_rx.recv() => self.set_keys(key, &body),
                _ = tick.tick() => self.tick(),
                _ = broadcast.tick() => {
                    self.send_snapshot();
                    if !self.connected() {
                        break;
                    }
                }
            }
        }

        info!("Lobby {} stopped after {} ticks", self.lobby_key, self.ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::connection::Connection;
    use shared::frame::Role;
    use shared::message::decode_key_records;
    use shared::KeySet;

    fn member(n: usize) -> (ClientConnection, tokio::io::DuplexStream) {
        let key = IdentityKey::new(format!("{:0>24}", n)).unwrap();
        let (stream, peer) = tokio::io::duplex(1024);
        let (_connection, handle) = Connection::new(stream, Role::Server, key, Vec::new());
        (handle, peer)
    }

    fn lobby(count: usize) -> LobbyGame {
        let members: Vec<ClientConnection> = (0..count).map(|n| member(n).0).collect();
        let keys: Vec<IdentityKey> = members.iter().map(|m| m.key().clone()).collect();
        LobbyGame::new(keys[0].clone(), members, Game::new(&keys, 11), &ServerConfig::default())
    }

    #[tokio::test]
    async fn test_tick_moves_player_with_held_keys() {
        let mut lobby = lobby(2);
        let key = lobby.members[0].key().clone();
        let start = lobby.game().player(key.as_str()).unwrap().body.position;

        lobby.set_keys(key.clone(), &KeySet::parse("S").unwrap().to_codes());
        for _ in 0..5 {
            lobby.tick();
        }

        let now = lobby.game().player(key.as_str()).unwrap().body.position;
        assert!(now.y > start.y);
        assert_eq!(now.x, start.x);
        assert_eq!(lobby.ticks, 5);
    }

    #[tokio::test]
    async fn test_key_states_relayed_as_records() {
        let mut lobby = lobby(2);
        let key = lobby.members[1].key().clone();
        lobby.set_keys(key.clone(), &[0, 3, 9]);

        let records = encode_key_records(&lobby.key_states);
        let decoded = decode_key_records(&records).unwrap();
        assert_eq!(decoded[&key], KeySet::parse("WD").unwrap());
    }

    #[tokio::test]
    async fn test_disconnected_lobby_detected() {
        let lobby = lobby(2);
        // the connection tasks were dropped with the test members
        assert!(!lobby.connected());
    }
}
