//! One-byte header application protocol carried in binary frames.
//!
//! Every frame payload is `header byte ++ body`. Server- and client-originated
//! headers are separate enums with disjoint codes, numbered in declaration
//! order, so a misrouted message is rejected at decode time.

use crate::input::KeySet;
use crate::key::{IdentityKey, KeyError};
use crate::{KeyStates, KEY_LEN};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("unknown header {0}")]
    UnknownHeader(u8),
    #[error("bad {header} body: {reason}")]
    Body { header: &'static str, reason: String },
}

impl MessageError {
    fn body(header: &'static str, reason: impl fmt::Display) -> Self {
        MessageError::Body {
            header,
            reason: reason.to_string(),
        }
    }
}

/// A header enumeration: one wire byte per variant.
pub trait Header: Copy + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {
    fn code(self) -> u8;
    fn from_code(code: u8) -> Option<Self>;
    fn name(self) -> &'static str;
}

/// Headers of messages sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerHeader {
    Ok,
    YourSocketKey,
    LobbyNotExist,
    LobbyNotAccept,
    AllSocketKeys,
    RandomSeed,
    Keys,
    GameStateTime,
    GameState,
}

/// Headers of messages sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientHeader {
    Ok,
    IsHost,
    StartGame,
    JoinLobby,
    Keys,
}

impl ServerHeader {
    pub const ALL: [ServerHeader; 9] = [
        ServerHeader::Ok,
        ServerHeader::YourSocketKey,
        ServerHeader::LobbyNotExist,
        ServerHeader::LobbyNotAccept,
        ServerHeader::AllSocketKeys,
        ServerHeader::RandomSeed,
        ServerHeader::Keys,
        ServerHeader::GameStateTime,
        ServerHeader::GameState,
    ];
}

impl ClientHeader {
    pub const ALL: [ClientHeader; 5] = [
        ClientHeader::Ok,
        ClientHeader::IsHost,
        ClientHeader::StartGame,
        ClientHeader::JoinLobby,
        ClientHeader::Keys,
    ];
}

/// Client codes start right after the last server code.
const CLIENT_BASE: u8 = ServerHeader::ALL.len() as u8;

// Every declared header must fit in the one-byte header field.
const _: () = assert!(ServerHeader::ALL.len() + ClientHeader::ALL.len() <= 255);

impl Header for ServerHeader {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    fn name(self) -> &'static str {
        match self {
            ServerHeader::Ok => "OK",
            ServerHeader::YourSocketKey => "YOURSOCKETKEY",
            ServerHeader::LobbyNotExist => "LOBBYNOTEXIST",
            ServerHeader::LobbyNotAccept => "LOBBYNOTACCEPT",
            ServerHeader::AllSocketKeys => "ALLSOCKETKEYS",
            ServerHeader::RandomSeed => "RANDOMSEED",
            ServerHeader::Keys => "KEYS",
            ServerHeader::GameStateTime => "GAMESTATETIME",
            ServerHeader::GameState => "GAMESTATE",
        }
    }
}

impl Header for ClientHeader {
    fn code(self) -> u8 {
        CLIENT_BASE + self as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(CLIENT_BASE)
            .and_then(|index| Self::ALL.get(index as usize).copied())
    }

    fn name(self) -> &'static str {
        match self {
            ClientHeader::Ok => "OK",
            ClientHeader::IsHost => "ISHOST",
            ClientHeader::StartGame => "STARTGAME",
            ClientHeader::JoinLobby => "JOINLOBBY",
            ClientHeader::Keys => "KEYS",
        }
    }
}

pub fn encode_message<H: Header>(header: H, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(header.code());
    out.extend_from_slice(body);
    out
}

/// Splits a frame payload into its header and body.
pub fn decode_message<H: Header>(data: &[u8]) -> Result<(H, &[u8]), MessageError> {
    let (&code, body) = data.split_first().ok_or(MessageError::Empty)?;
    let header = H::from_code(code).ok_or(MessageError::UnknownHeader(code))?;
    Ok((header, body))
}

// Body layouts. Each `encode_*` has a matching `decode_*`.

pub fn encode_seed(seed: u32) -> Vec<u8> {
    seed.to_be_bytes().to_vec()
}

pub fn decode_seed(body: &[u8]) -> Result<u32, MessageError> {
    let bytes: [u8; 4] = body
        .try_into()
        .map_err(|_| MessageError::body("RANDOMSEED", format!("expected 4 bytes, got {}", body.len())))?;
    Ok(u32::from_be_bytes(bytes))
}

pub fn encode_key(key: &IdentityKey) -> Vec<u8> {
    key.as_bytes().to_vec()
}

pub fn decode_key(header: &'static str, body: &[u8]) -> Result<IdentityKey, MessageError> {
    IdentityKey::from_bytes(body).map_err(|e: KeyError| MessageError::body(header, e))
}

/// `u8 count ++ count * 24-byte key`.
pub fn encode_all_keys(keys: &[IdentityKey]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + keys.len() * KEY_LEN);
    out.push(keys.len() as u8);
    for key in keys {
        out.extend_from_slice(key.as_bytes());
    }
    out
}

pub fn decode_all_keys(body: &[u8]) -> Result<Vec<IdentityKey>, MessageError> {
    let (&count, rest) = body
        .split_first()
        .ok_or_else(|| MessageError::body("ALLSOCKETKEYS", "missing count"))?;
    if rest.len() != count as usize * KEY_LEN {
        return Err(MessageError::body(
            "ALLSOCKETKEYS",
            format!("{} keys need {} bytes, got {}", count, count as usize * KEY_LEN, rest.len()),
        ));
    }
    rest.chunks(KEY_LEN)
        .map(|chunk| IdentityKey::from_bytes(chunk).map_err(|e| MessageError::body("ALLSOCKETKEYS", e)))
        .collect()
}

/// Client `KEYS` body: one code per held key.
pub fn encode_key_codes(keys: &KeySet) -> Vec<u8> {
    keys.to_codes()
}

pub fn decode_key_codes(body: &[u8]) -> KeySet {
    KeySet::from_codes(body)
}

/// Server `KEYS` body: `{u8 len, 24-byte key, len key codes}` per member.
pub fn encode_key_records<'a>(records: impl IntoIterator<Item = (&'a IdentityKey, &'a KeySet)>) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, keys) in records {
        let codes = keys.to_codes();
        out.push(codes.len() as u8);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&codes);
    }
    out
}

pub fn decode_key_records(body: &[u8]) -> Result<KeyStates, MessageError> {
    let mut states = KeyStates::new();
    let mut rest = body;
    while let Some((&len, tail)) = rest.split_first() {
        let needed = KEY_LEN + len as usize;
        if tail.len() < needed {
            return Err(MessageError::body(
                "KEYS",
                format!("record needs {} bytes, {} left", needed, tail.len()),
            ));
        }
        let key = IdentityKey::from_bytes(&tail[..KEY_LEN]).map_err(|e| MessageError::body("KEYS", e))?;
        states.insert(key, KeySet::from_codes(&tail[KEY_LEN..needed]));
        rest = &tail[needed..];
    }
    Ok(states)
}

/// `GAMESTATETIME` body: decimal ASCII Unix milliseconds.
pub fn encode_timestamp(millis: u64) -> Vec<u8> {
    millis.to_string().into_bytes()
}

pub fn decode_timestamp(body: &[u8]) -> Result<u64, MessageError> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| MessageError::body("GAMESTATETIME", "not a decimal timestamp"))
}

/// `ISHOST` body: a single byte, 1 to host and 0 to join.
pub fn encode_is_host(host: bool) -> Vec<u8> {
    vec![host as u8]
}

pub fn decode_is_host(body: &[u8]) -> Result<bool, MessageError> {
    match body {
        [0] => Ok(false),
        [1] => Ok(true),
        _ => Err(MessageError::body("ISHOST", "expected a single 0 or 1 byte")),
    }
}
