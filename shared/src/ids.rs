//! Entity id allocation.
//!
//! Each [`crate::Game`] owns its own arena so simulations in different lobbies
//! never share id space.

use crate::entity::EntityId;
use std::collections::VecDeque;

/// Hands out ids from a monotonic counter, reusing released ids first
/// (oldest release first).
#[derive(Debug, Clone)]
pub struct IdArena {
    /// Lowest id never handed out; `None` once the whole u16 range has been used
    next: Option<u16>,
    free: VecDeque<u16>,
}

impl Default for IdArena {
    fn default() -> Self {
        Self {
            next: Some(0),
            free: VecDeque::new(),
        }
    }
}

impl IdArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an arena whose live ids are exactly `live`.
    ///
    /// Gaps below the highest live id become free, in ascending order.
    pub fn from_live(live: impl IntoIterator<Item = EntityId>) -> Self {
        let mut ids: Vec<u16> = live.into_iter().map(|id| id.0).collect();
        ids.sort_unstable();
        ids.dedup();

        let (next, end) = match ids.last() {
            Some(&max) => (max.checked_add(1), u32::from(max) + 1),
            None => (Some(0), 0),
        };
        let mut free = VecDeque::new();
        let mut live = ids.into_iter().peekable();
        for candidate in (0..end).map(|candidate| candidate as u16) {
            if live.peek() == Some(&candidate) {
                live.next();
            } else {
                free.push_back(candidate);
            }
        }

        Self { next, free }
    }

    /// Returns `None` when every id is live.
    pub fn assign(&mut self) -> Option<EntityId> {
        if let Some(id) = self.free.pop_front() {
            return Some(EntityId(id));
        }
        let id = self.next?;
        self.next = id.checked_add(1);
        Some(EntityId(id))
    }

    /// Returns `id` to the pool. Ids never handed out, or already free, are ignored.
    pub fn release(&mut self, id: EntityId) -> bool {
        let assigned = self.next.map_or(true, |next| id.0 < next);
        if !assigned || self.free.contains(&id.0) {
            return false;
        }
        self.free.push_back(id.0);
        true
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
