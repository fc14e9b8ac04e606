//! Server reconciliation for the locally predicted simulation
//!
//! The client never waits for the server before advancing its own copy of the
//! game. Instead it saves encoded snapshots of its prediction, timed to land
//! just before each expected server broadcast, and checks every authoritative
//! snapshot against the oldest saved prediction:
//!
//! - No saved prediction: adopt the authoritative state
//! - More saved predictions than [`MAX_SNAPSHOT_HISTORY`]: adopt
//! - Oldest prediction within tolerance: drop it and keep predicting
//! - Otherwise: adopt
//!
//! Adopting replaces the local object list wholesale and clears the history.

use log::debug;
use shared::snapshot::SnapshotError;
use shared::{ApproxEq, Game, Snapshot, MAX_SNAPSHOT_HISTORY};
use std::collections::VecDeque;
use std::time::Duration;

/// Why the authoritative state replaced the local prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdoptReason {
    /// Nothing was saved yet, e.g. the first snapshot after start.
    NoHistory,
    /// The history grew past its bound.
    Overflow,
    /// The oldest saved prediction differed beyond tolerance.
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Prediction matched; local state kept.
    Confirmed,
    Adopted(AdoptReason),
}

#[derive(Debug, Default)]
pub struct Reconciler {
    /// Encoded local snapshots, oldest first
    history: VecDeque<Vec<u8>>,
    /// Last snapshot received from the server
    authoritative: Option<Snapshot>,
    confirmed: u64,
    adopted: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long after a `GAMESTATETIME` message to save the local state.
    ///
    /// `ping` is the one-way delay measured from the server timestamp; the
    /// remainder modulo the broadcast interval places the save just ahead of
    /// the next broadcast.
    pub fn save_delay(ping: Duration, broadcast_interval: Duration) -> Duration {
        if broadcast_interval.is_zero() {
            return Duration::ZERO;
        }
        let interval = broadcast_interval.as_nanos();
        Duration::from_nanos((ping.as_nanos() % interval) as u64)
    }

    /// Appends the current local state to the history.
    pub fn save(&mut self, game: &Game) -> Result<(), SnapshotError> {
        self.history.push_back(game.snapshot().encode()?);
        Ok(())
    }

    /// Checks `authoritative` against the oldest saved prediction and updates `game`.
    pub fn reconcile(&mut self, game: &mut Game, authoritative: Snapshot) -> Outcome {
        let outcome = match self.history.front() {
            None => Outcome::Adopted(AdoptReason::NoHistory),
            Some(_) if self.history.len() > MAX_SNAPSHOT_HISTORY => Outcome::Adopted(AdoptReason::Overflow),
            Some(bytes) => match Snapshot::decode(bytes) {
                Ok(predicted) if predicted.approx_eq(&authoritative) => Outcome::Confirmed,
                Ok(_) => Outcome::Adopted(AdoptReason::Mismatch),
                Err(e) => {
                    debug!("Saved prediction does not decode: {}", e);
                    Outcome::Adopted(AdoptReason::Mismatch)
                }
            },
        };

        match outcome {
            Outcome::Confirmed => {
                self.history.pop_front();
                self.confirmed += 1;
            }
            Outcome::Adopted(reason) => {
                debug!(
                    "Adopting server state ({:?}, {} predictions dropped)",
                    reason,
                    self.history.len()
                );
                game.replace_objects(authoritative.objects().to_vec());
                self.history.clear();
                self.adopted += 1;
            }
        }

        game.refresh_players();
        self.authoritative = Some(authoritative);
        outcome
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn authoritative(&self) -> Option<&Snapshot> {
        self.authoritative.as_ref()
    }

    /// Confirmed and adopted counts so far.
    pub fn stats(&self) -> (u64, u64) {
        (self.confirmed, self.adopted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{GameObject, IdentityKey, KeySet, KeyStates, Vector2, TICK_INTERVAL_MS};

    fn keys() -> Vec<IdentityKey> {
        vec![IdentityKey::new("AAAAAAAAAAAAAAAAAAAAAA==").unwrap()]
    }

    fn shifted(snapshot: &Snapshot, dx: f32) -> Snapshot {
        let objects = snapshot
            .objects()
            .iter()
            .cloned()
            .map(|object| match object {
                GameObject::Player(mut player) => {
                    player.body.position.x += dx;
                    GameObject::Player(player)
                }
                other => other,
            })
            .collect();
        Snapshot::new(objects)
    }

    #[test]
    fn test_empty_history_adopts() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        let authoritative = shifted(&game.snapshot(), 50.0);

        let outcome = reconciler.reconcile(&mut game, authoritative.clone());

        assert_eq!(outcome, Outcome::Adopted(AdoptReason::NoHistory));
        assert_eq!(game.objects(), authoritative.objects());
        assert_eq!(reconciler.authoritative(), Some(&authoritative));
    }

    #[test]
    fn test_matching_snapshot_pops_and_keeps_state() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        reconciler.save(&game).unwrap();

        let mut held = KeyStates::new();
        held.insert(keys()[0].clone(), KeySet::parse("D").unwrap());
        game.update(&held, TICK_INTERVAL_MS);
        let predicted = game.objects().to_vec();

        let authoritative = shifted(&Snapshot::decode(&game.snapshot().encode().unwrap()).unwrap(), -1.0);
        let outcome = reconciler.reconcile(&mut game, authoritative);

        // the saved state was taken before the update, and still matches within tolerance
        assert_eq!(outcome, Outcome::Confirmed);
        assert_eq!(reconciler.history_len(), 0);
        assert_eq!(game.objects(), predicted.as_slice());
    }

    #[test]
    fn test_mismatch_replaces_state_and_clears_history() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        reconciler.save(&game).unwrap();
        reconciler.save(&game).unwrap();

        let authoritative = shifted(&game.snapshot(), 10.0);
        let outcome = reconciler.reconcile(&mut game, authoritative.clone());

        assert_eq!(outcome, Outcome::Adopted(AdoptReason::Mismatch));
        assert_eq!(reconciler.history_len(), 0);
        assert_eq!(game.objects(), authoritative.objects());
        let key = keys()[0].clone();
        assert_eq!(
            game.player(key.as_str()).unwrap().body.position,
            authoritative.objects()[0].body().unwrap().position
        );
    }

    #[test]
    fn test_overflow_adopts() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        for _ in 0..=MAX_SNAPSHOT_HISTORY {
            reconciler.save(&game).unwrap();
        }

        let current = game.snapshot();
        let outcome = reconciler.reconcile(&mut game, current);

        assert_eq!(outcome, Outcome::Adopted(AdoptReason::Overflow));
        assert_eq!(reconciler.history_len(), 0);
        assert_eq!(reconciler.stats(), (0, 1));
    }

    #[test]
    fn test_full_history_still_compares() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        for _ in 0..MAX_SNAPSHOT_HISTORY {
            reconciler.save(&game).unwrap();
        }

        let current = game.snapshot();
        assert_eq!(reconciler.reconcile(&mut game, current), Outcome::Confirmed);
        assert_eq!(reconciler.history_len(), MAX_SNAPSHOT_HISTORY - 1);
    }

    #[test]
    fn test_save_delay_wraps_ping() {
        let interval = Duration::from_millis(200);
        assert_eq!(Reconciler::save_delay(Duration::from_millis(30), interval), Duration::from_millis(30));
        assert_eq!(Reconciler::save_delay(Duration::from_millis(230), interval), Duration::from_millis(30));
        assert_eq!(Reconciler::save_delay(Duration::ZERO, interval), Duration::ZERO);
        assert_eq!(Reconciler::save_delay(Duration::from_millis(5), Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_adopted_state_keeps_simulating() {
        let mut game = Game::new(&keys(), 5);
        let mut reconciler = Reconciler::new();
        let authoritative = Snapshot::new(vec![GameObject::Player(shared::PlayerEntity::new(
            shared::EntityId(0),
            Vector2::new(1000.0, 1000.0),
            keys()[0].clone(),
        ))]);
        reconciler.reconcile(&mut game, authoritative);

        let mut held = KeyStates::new();
        held.insert(keys()[0].clone(), KeySet::parse("W").unwrap());
        game.update(&held, TICK_INTERVAL_MS);

        let player = game.player(keys()[0].as_str()).unwrap();
        assert!(player.body.position.y < 1000.0);
    }
}
