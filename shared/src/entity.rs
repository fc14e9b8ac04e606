use crate::input::{KeySet, LogicalKey};
use crate::key::IdentityKey;
use crate::vector::Vector2;
use crate::{FIELD_MAX, FIELD_MIN, PLAYER_SPEED, VELOCITY_DAMPING};
use std::fmt;

/// Numeric entity identifier, unique among live entities of one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u16);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Base object: an id and a removal flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub remove: bool,
}

impl Entity {
    pub fn new(id: EntityId) -> Self {
        Self { id, remove: false }
    }
}

/// An entity that moves: position over the whole field, small velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalEntity {
    pub entity: Entity,
    pub position: Vector2,
    pub velocity: Vector2,
}

impl PhysicalEntity {
    pub fn new(id: EntityId, position: Vector2) -> Self {
        Self {
            entity: Entity::new(id),
            position,
            velocity: Vector2::ZERO,
        }
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    /// Integrates position over `dt` milliseconds and keeps it inside the field.
    pub fn update(&mut self, dt: f32) {
        self.position = self.position.add(&self.velocity.scale(dt));
        self.clamp_to_field();
    }

    /// Pins the position to the field bounds, dropping any velocity component
    /// that points back out of the field.
    pub fn clamp_to_field(&mut self) {
        if self.position.x < FIELD_MIN {
            self.position.x = FIELD_MIN;
            self.velocity.x = self.velocity.x.max(0.0);
        }
        if self.position.x > FIELD_MAX {
            self.position.x = FIELD_MAX;
            self.velocity.x = self.velocity.x.min(0.0);
        }
        if self.position.y < FIELD_MIN {
            self.position.y = FIELD_MIN;
            self.velocity.y = self.velocity.y.max(0.0);
        }
        if self.position.y > FIELD_MAX {
            self.position.y = FIELD_MAX;
            self.velocity.y = self.velocity.y.min(0.0);
        }
    }
}

/// A physical entity steered by the held keys of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEntity {
    pub body: PhysicalEntity,
    pub key: IdentityKey,
}

impl PlayerEntity {
    pub fn new(id: EntityId, position: Vector2, key: IdentityKey) -> Self {
        Self {
            body: PhysicalEntity::new(id, position),
            key,
        }
    }

    pub fn id(&self) -> EntityId {
        self.body.id()
    }

    /// Adds one tick's movement impulse for the held keys.
    ///
    /// Directions compose first, so a diagonal press is as fast as a straight one.
    pub fn apply_keys(&mut self, keys: &KeySet) {
        let mut direction = Vector2::ZERO;
        for key in keys.iter() {
            let step = match key {
                LogicalKey::W => Vector2::UP,
                LogicalKey::A => Vector2::LEFT,
                LogicalKey::S => Vector2::DOWN,
                LogicalKey::D => Vector2::RIGHT,
            };
            direction = direction.add(&step);
        }

        let impulse = direction.normalize().scale(PLAYER_SPEED);
        self.body.velocity = self.body.velocity.add(&impulse);
    }

    pub fn update(&mut self, dt: f32) {
        self.body.velocity = self.body.velocity.scale(VELOCITY_DAMPING);
        self.body.update(dt);
    }
}

/// Every kind of object the simulation holds.
#[derive(Debug, Clone, PartialEq)]
pub enum GameObject {
    Entity(Entity),
    Physical(PhysicalEntity),
    Player(PlayerEntity),
}

impl GameObject {
    pub fn id(&self) -> EntityId {
        self.entity().id
    }

    pub fn entity(&self) -> &Entity {
        match self {
            GameObject::Entity(entity) => entity,
            GameObject::Physical(body) => &body.entity,
            GameObject::Player(player) => &player.body.entity,
        }
    }

    fn entity_mut(&mut self) -> &mut Entity {
        match self {
            GameObject::Entity(entity) => entity,
            GameObject::Physical(body) => &mut body.entity,
            GameObject::Player(player) => &mut player.body.entity,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.entity().remove
    }

    pub fn mark_removed(&mut self) {
        self.entity_mut().remove = true;
    }

    /// The physical body, if this object has one.
    pub fn body(&self) -> Option<&PhysicalEntity> {
        match self {
            GameObject::Entity(_) => None,
            GameObject::Physical(body) => Some(body),
            GameObject::Player(player) => Some(&player.body),
        }
    }

    pub fn as_player(&self) -> Option<&PlayerEntity> {
        match self {
            GameObject::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn update(&mut self, dt: f32) {
        match self {
            GameObject::Entity(_) => {}
            GameObject::Physical(body) => body.update(dt),
            GameObject::Player(player) => player.update(dt),
        }
    }
}
