//! Binary encoding of the simulation's object list.
//!
//! Layout, big-endian throughout:
//!
//! ```text
//! u16 object count
//! repeated: u8 tag, fields
//!
//! vector           u8 x, u8 y
//! extended vector  u16 x, u16 y
//! entity           u16 id
//! physical entity  entity, extended vector position, vector velocity
//! player entity    physical entity, 24-byte identity key
//! ```
//!
//! Only entity tags appear at the top level; the vector tags exist so the tag
//! space matches the field types. Velocity components are cut down to one
//! unsigned byte each, so any fraction, any sign, and anything above 255 is
//! lost in transit. Tolerance-based equality ([`ApproxEq`]) absorbs the
//! fractional part.

use crate::entity::{Entity, EntityId, GameObject, PhysicalEntity, PlayerEntity};
use crate::key::IdentityKey;
use crate::vector::Vector2;
use crate::{KEY_LEN, POSITION_TOLERANCE};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Vector = 0,
    ExtendedVector = 1,
    Entity = 2,
    Physical = 3,
    Player = 4,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Tag::Vector),
            1 => Some(Tag::ExtendedVector),
            2 => Some(Tag::Entity),
            3 => Some(Tag::Physical),
            4 => Some(Tag::Player),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot truncated: needed {needed} bytes at offset {offset}")]
    Truncated { needed: usize, offset: usize },
    #[error("unknown type tag {0}")]
    UnknownTag(u8),
    #[error("type tag {0} cannot appear as a top-level object")]
    UnexpectedTag(u8),
    #[error("player identity key is not valid")]
    InvalidKey,
    #[error("too many objects for one snapshot: {0}")]
    TooManyObjects(usize),
}

/// Equality up to the precision the wire format keeps.
pub trait ApproxEq {
    fn approx_eq(&self, other: &Self) -> bool;
}

impl ApproxEq for Vector2 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self.x - other.x).abs() < POSITION_TOLERANCE && (self.y - other.y).abs() < POSITION_TOLERANCE
    }
}

impl ApproxEq for Entity {
    fn approx_eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl ApproxEq for PhysicalEntity {
    fn approx_eq(&self, other: &Self) -> bool {
        self.entity.approx_eq(&other.entity)
            && self.position.approx_eq(&other.position)
            && self.velocity.approx_eq(&other.velocity)
    }
}

impl ApproxEq for PlayerEntity {
    fn approx_eq(&self, other: &Self) -> bool {
        self.body.approx_eq(&other.body) && self.key == other.key
    }
}

impl ApproxEq for GameObject {
    fn approx_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GameObject::Entity(a), GameObject::Entity(b)) => a.approx_eq(b),
            (GameObject::Physical(a), GameObject::Physical(b)) => a.approx_eq(b),
            (GameObject::Player(a), GameObject::Player(b)) => a.approx_eq(b),
            _ => false,
        }
    }
}

/// An immutable, fully decoded object list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    objects: Vec<GameObject>,
}

impl Snapshot {
    pub fn new(objects: Vec<GameObject>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[GameObject] {
        &self.objects
    }

    pub fn into_objects(self) -> Vec<GameObject> {
        self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        encode_objects(&self.objects)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SnapshotError> {
        let mut reader = Reader::new(buf);
        let count = reader.u16()? as usize;
        let mut objects = Vec::with_capacity(count);
        for _ in 0..count {
            objects.push(reader.object()?);
        }
        Ok(Self { objects })
    }
}

impl ApproxEq for Snapshot {
    fn approx_eq(&self, other: &Self) -> bool {
        self.objects.len() == other.objects.len()
            && self
                .objects
                .iter()
                .zip(&other.objects)
                .all(|(a, b)| a.approx_eq(b))
    }
}

/// Encodes an object list without cloning it into a [`Snapshot`].
pub fn encode_objects(objects: &[GameObject]) -> Result<Vec<u8>, SnapshotError> {
    let count = u16::try_from(objects.len()).map_err(|_| SnapshotError::TooManyObjects(objects.len()))?;

    let mut out = Vec::with_capacity(2 + objects.len() * (1 + PLAYER_RECORD_LEN));
    out.extend_from_slice(&count.to_be_bytes());
    for object in objects {
        write_object(&mut out, object);
    }
    Ok(out)
}

const PHYSICAL_RECORD_LEN: usize = 2 + 4 + 2;
const PLAYER_RECORD_LEN: usize = PHYSICAL_RECORD_LEN + KEY_LEN;

fn write_object(out: &mut Vec<u8>, object: &GameObject) {
    match object {
        GameObject::Entity(entity) => {
            out.push(Tag::Entity as u8);
            write_entity(out, entity);
        }
        GameObject::Physical(body) => {
            out.push(Tag::Physical as u8);
            write_physical(out, body);
        }
        GameObject::Player(player) => {
            out.push(Tag::Player as u8);
            write_physical(out, &player.body);
            out.extend_from_slice(player.key.as_bytes());
        }
    }
}

fn write_entity(out: &mut Vec<u8>, entity: &Entity) {
    out.extend_from_slice(&entity.id.0.to_be_bytes());
}

fn write_physical(out: &mut Vec<u8>, body: &PhysicalEntity) {
    write_entity(out, &body.entity);
    write_extended_vector(out, body.position);
    write_vector(out, body.velocity);
}

fn write_vector(out: &mut Vec<u8>, v: Vector2) {
    out.push(to_byte(v.x));
    out.push(to_byte(v.y));
}

fn write_extended_vector(out: &mut Vec<u8>, v: Vector2) {
    out.extend_from_slice(&to_word(v.x).to_be_bytes());
    out.extend_from_slice(&to_word(v.y).to_be_bytes());
}

/// Truncates toward zero, then wraps into a byte.
fn to_byte(component: f32) -> u8 {
    component as i64 as u8
}

fn to_word(component: f32) -> u16 {
    component as i64 as u16
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.offset + len;
        if end > self.buf.len() {
            return Err(SnapshotError::Truncated {
                needed: len,
                offset: self.offset,
            });
        }
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn object(&mut self) -> Result<GameObject, SnapshotError> {
        let byte = self.u8()?;
        match Tag::from_byte(byte) {
            Some(Tag::Entity) => Ok(GameObject::Entity(self.entity()?)),
            Some(Tag::Physical) => Ok(GameObject::Physical(self.physical()?)),
            Some(Tag::Player) => {
                let body = self.physical()?;
                let key = IdentityKey::from_bytes(self.take(KEY_LEN)?)
                    .map_err(|_| SnapshotError::InvalidKey)?;
                Ok(GameObject::Player(PlayerEntity { body, key }))
            }
            Some(Tag::Vector) | Some(Tag::ExtendedVector) => Err(SnapshotError::UnexpectedTag(byte)),
            None => Err(SnapshotError::UnknownTag(byte)),
        }
    }

    fn entity(&mut self) -> Result<Entity, SnapshotError> {
        Ok(Entity::new(EntityId(self.u16()?)))
    }

    fn physical(&mut self) -> Result<PhysicalEntity, SnapshotError> {
        let entity = self.entity()?;
        let position = Vector2::new(self.u16()? as f32, self.u16()? as f32);
        let velocity = Vector2::new(self.u8()? as f32, self.u8()? as f32);
        Ok(PhysicalEntity {
            entity,
            position,
            velocity,
        })
    }
}
