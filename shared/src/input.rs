//! Logical movement keys and the set of keys a peer currently holds.

use std::fmt;

/// A logical key, independent of any physical keyboard layout.
///
/// Codes are the single bytes sent in `KEYS` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogicalKey {
    W = 0,
    A = 1,
    S = 2,
    D = 3,
}

impl LogicalKey {
    pub const ALL: [LogicalKey; 4] = [LogicalKey::W, LogicalKey::A, LogicalKey::S, LogicalKey::D];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.code() == code)
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'W' => Some(LogicalKey::W),
            'A' => Some(LogicalKey::A),
            'S' => Some(LogicalKey::S),
            'D' => Some(LogicalKey::D),
            _ => None,
        }
    }
}

/// Set of held logical keys, stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeySet(u8);

impl KeySet {
    pub const EMPTY: KeySet = KeySet(0);

    pub fn insert(&mut self, key: LogicalKey) {
        self.0 |= 1 << key.code();
    }

    pub fn remove(&mut self, key: LogicalKey) {
        self.0 &= !(1 << key.code());
    }

    pub fn contains(&self, key: LogicalKey) -> bool {
        self.0 & (1 << key.code()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = LogicalKey> + '_ {
        LogicalKey::ALL.into_iter().filter(|key| self.contains(*key))
    }

    /// Key codes as sent in a client `KEYS` body.
    pub fn to_codes(&self) -> Vec<u8> {
        self.iter().map(LogicalKey::code).collect()
    }

    /// Builds a set from `KEYS` body bytes. Codes with no logical key are ignored.
    pub fn from_codes(codes: &[u8]) -> Self {
        codes
            .iter()
            .filter_map(|code| LogicalKey::from_code(*code))
            .collect()
    }

    /// Parses a string of key letters such as `"WD"`.
    pub fn parse(letters: &str) -> Option<Self> {
        letters
            .chars()
            .map(LogicalKey::from_char)
            .collect::<Option<KeySet>>()
    }
}

impl FromIterator<LogicalKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = LogicalKey>>(iter: I) -> Self {
        let mut set = KeySet::EMPTY;
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
