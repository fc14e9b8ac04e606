//! Per-connection identity keys.
//!
//! The key a client offers during the upgrade handshake doubles as its
//! session token, its lobby code when hosting, and the controller identity of
//! its player entity. On the wire it is always exactly [`KEY_LEN`] bytes.

use crate::KEY_LEN;
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("identity key must be {KEY_LEN} bytes, got {0}")]
    Length(usize),
    #[error("identity key is not valid UTF-8")]
    Utf8,
}

/// An opaque, fixed-length connection identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key = key.into();
        if key.len() != KEY_LEN {
            return Err(KeyError::Length(key.len()));
        }
        Ok(Self(key))
    }

    /// Parses a key from exactly [`KEY_LEN`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::Length(bytes.len()));
        }
        let key = std::str::from_utf8(bytes).map_err(|_| KeyError::Utf8)?;
        Ok(Self(key.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for IdentityKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for IdentityKey {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
