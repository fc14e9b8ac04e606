//! The fixed-step simulation run identically by the server and every client.

use crate::entity::{Entity, EntityId, GameObject, PhysicalEntity, PlayerEntity};
use crate::ids::IdArena;
use crate::input::KeySet;
use crate::key::IdentityKey;
use crate::random::SplitMix32;
use crate::snapshot::Snapshot;
use crate::vector::Vector2;
use crate::{SPAWN_MAX, SPAWN_MIN};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;

/// Held keys per connection, rebuilt from the latest `KEYS` message of each peer.
pub type KeyStates = HashMap<IdentityKey, KeySet>;

#[derive(Debug, Clone)]
pub struct Game {
    objects: Vec<GameObject>,
    /// Identity key -> index into `objects` of that key's player entity.
    players: HashMap<IdentityKey, usize>,
    ids: IdArena,
    random: SplitMix32,
}

impl Game {
    /// Builds the initial state for a lobby.
    ///
    /// One player entity per key, in key order, with ids drawn from a fresh
    /// arena and spawn points drawn from the seeded generator. The server and
    /// every client call this with the same keys and seed and get the same state.
    pub fn new(keys: &[IdentityKey], seed: u32) -> Self {
        let mut game = Self {
            objects: Vec::with_capacity(keys.len()),
            players: HashMap::new(),
            ids: IdArena::new(),
            random: SplitMix32::new(seed),
        };

        for key in keys {
            let x = game.random.gen_range(SPAWN_MIN..SPAWN_MAX);
            let y = game.random.gen_range(SPAWN_MIN..SPAWN_MAX);
            let Some(id) = game.ids.assign() else {
                warn!("No entity ids left for {}", key);
                break;
            };
            debug!("Spawned player {} for {} at ({:.1}, {:.1})", id, key, x, y);

            game.players.insert(key.clone(), game.objects.len());
            game.objects
                .push(GameObject::Player(PlayerEntity::new(id, Vector2::new(x, y), key.clone())));
        }

        info!("Created game with {} players (seed {})", keys.len(), seed);
        game
    }

    pub fn seed(&self) -> u32 {
        self.random.seed()
    }

    pub fn objects(&self) -> &[GameObject] {
        &self.objects
    }

    pub fn player(&self, key: &str) -> Option<&PlayerEntity> {
        self.players
            .get(key)
            .and_then(|index| self.objects.get(*index))
            .and_then(GameObject::as_player)
    }

    /// Advances the simulation by one step of `dt` milliseconds.
    ///
    /// Held keys are turned into impulses first, then every object is
    /// integrated, then objects flagged for removal are dropped (swap with
    /// last, so survivors may change order).
    pub fn update(&mut self, key_states: &KeyStates, dt: f32) {
        for (key, keys) in key_states {
            if let Some(index) = self.players.get(key) {
                if let Some(GameObject::Player(player)) = self.objects.get_mut(*index) {
                    player.apply_keys(keys);
                }
            }
        }

        for object in &mut self.objects {
            object.update(dt);
        }

        self.remove_flagged();
    }

    /// Adds a bare entity. `None` when every id is in use.
    pub fn spawn_entity(&mut self) -> Option<EntityId> {
        let id = self.ids.assign()?;
        self.objects.push(GameObject::Entity(Entity::new(id)));
        Some(id)
    }

    /// Adds a physical entity with the given state. `None` when every id is in use.
    pub fn spawn_physical(&mut self, position: Vector2, velocity: Vector2) -> Option<EntityId> {
        let id = self.ids.assign()?;
        let mut body = PhysicalEntity::new(id, position);
        body.velocity = velocity;
        self.objects.push(GameObject::Physical(body));
        Some(id)
    }

    /// Flags an object for removal at the end of the next update.
    ///
    /// The id stays taken until the object is actually dropped.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(object) = self
            .objects
            .iter_mut()
            .find(|object| object.id() == id && !object.is_removed())
        else {
            return false;
        };
        object.mark_removed();
        true
    }

    /// Replaces the whole object list, e.g. with an authoritative snapshot.
    pub fn replace_objects(&mut self, objects: Vec<GameObject>) {
        self.ids = IdArena::from_live(objects.iter().map(GameObject::id));
        self.objects = objects;
        self.refresh_players();
    }

    /// Rebuilds the identity key -> player lookup from the current object list.
    pub fn refresh_players(&mut self) {
        self.players.clear();
        for (index, object) in self.objects.iter().enumerate() {
            if let GameObject::Player(player) = object {
                self.players.insert(player.key.clone(), index);
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.objects.clone())
    }

    fn remove_flagged(&mut self) {
        let before = self.objects.len();
        for index in (0..self.objects.len()).rev() {
            if self.objects[index].is_removed() {
                let removed = self.objects.swap_remove(index);
                self.ids.release(removed.id());
            }
        }

        if self.objects.len() != before {
            self.refresh_players();
        }
    }
}
