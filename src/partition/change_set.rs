//! `ChangeSet`: the pending ownership transfers of one rebalance round.
//!
//! Produced by the external partitioning oracle, consumed exactly once by
//! migration, then cleared. Keys are tagged global ids of locally owned
//! objects; values are destination *partitions* (not ranks — the ownership
//! hash maps partitions to ranks).

use crate::index::global_id::GlobalId;
use std::collections::BTreeMap;

/// Mapping `{tagged global id → destination partition}`.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    moves: BTreeMap<GlobalId, u32>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or overwrites) a pending transfer.
    pub fn insert(&mut self, id: GlobalId, dest_part: u32) {
        self.moves.insert(id, dest_part);
    }

    /// Destination partition of a pending transfer, if any.
    pub fn get(&self, id: GlobalId) -> Option<u32> {
        self.moves.get(&id).copied()
    }

    pub fn contains(&self, id: GlobalId) -> bool {
        self.moves.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Iterates pending transfers in id order.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, u32)> + '_ {
        self.moves.iter().map(|(&id, &part)| (id, part))
    }

    /// Drops all pending transfers (migration calls this after consuming).
    pub fn clear(&mut self) {
        self.moves.clear();
    }
}

impl FromIterator<(GlobalId, u32)> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = (GlobalId, u32)>>(iter: T) -> Self {
        Self {
            moves: iter.into_iter().collect(),
        }
    }
}
