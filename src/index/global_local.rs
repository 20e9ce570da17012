//! `GlobalLocalIndex`: the global→local half of the translation layer.
//!
//! An ordered mapping from tagged global id to dense local slot. The access
//! profile is build-once, query-many: construction bulk-inserts in
//! registration order, sorts once, and every later lookup is a binary
//! search. Migration appends fresh tail entries and re-sorts.
//!
//! # Invariants
//!
//! - After `sort_keys`, keys are strictly increasing (no duplicates).
//! - Every locally present global id (owned or ghost) has exactly one entry.
//! - Over `[0, total)` slots, every slot is referenced by exactly one entry
//!   (total bijection over the locally stored rows).
//!
//! These invariants are checked after mutations in debug builds and when the
//! `check-invariants` feature is enabled; the bijection half takes the slot
//! count and is verified by [`validate_bijection`](GlobalLocalIndex::validate_bijection).

use crate::debug_invariants::DebugInvariants;
use crate::index::global_id::GlobalId;
use crate::repart_error::MeshRepartError;

/// Ordered `{tagged global id → local slot}` map.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct GlobalLocalIndex {
    entries: Vec<(GlobalId, u32)>,
    sorted: bool,
    /// Monotonic version that changes on any structural modification.
    version: u64,
}

impl GlobalLocalIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sorted: true,
            version: 0,
        }
    }

    /// Pre-allocates for the expected total slot count.
    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
    }

    /// Appends an entry without ordering checks; call
    /// [`sort_keys`](Self::sort_keys) before relying on fast lookups.
    pub fn insert_blindly(&mut self, id: GlobalId, slot: u32) {
        self.entries.push((id, slot));
        self.sorted = false;
        self.version = self.version.wrapping_add(1);
    }

    /// Sorts by key and verifies uniqueness; lookups are binary searches
    /// from here on.
    pub fn sort_keys(&mut self) -> Result<(), MeshRepartError> {
        self.entries.sort_unstable_by_key(|&(id, _)| id);
        if let Some(w) = self.entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(MeshRepartError::DuplicateGlobalId(w[0].0));
        }
        self.sorted = true;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Looks up the local slot of a tagged global id.
    ///
    /// Binary search when sorted; falls back to a linear scan on an
    /// unsorted map rather than mutating it behind the caller's back.
    pub fn find(&self, id: GlobalId) -> Option<u32> {
        if self.sorted {
            self.entries
                .binary_search_by_key(&id, |&(k, _)| k)
                .ok()
                .map(|i| self.entries[i].1)
        } else {
            self.entries
                .iter()
                .find(|&&(k, _)| k == id)
                .map(|&(_, s)| s)
        }
    }

    /// True iff `id` is registered.
    pub fn contains(&self, id: GlobalId) -> bool {
        self.find(id).is_some()
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Monotonic version that changes whenever the map structure changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Iterates `(id, slot)` pairs in key order (insertion order if the map
    /// has not been sorted yet).
    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, u32)> + '_ {
        self.entries.iter().copied()
    }

    /// Drops every entry and re-inserts from an iterator, as one atomic
    /// step from the caller's perspective; used by registry compaction.
    pub fn rebuild<I>(&mut self, entries: I) -> Result<(), MeshRepartError>
    where
        I: IntoIterator<Item = (GlobalId, u32)>,
    {
        self.entries.clear();
        self.entries.extend(entries);
        self.sorted = false;
        self.sort_keys()
    }

    /// Verifies the slot half of the bijection: every slot in
    /// `[0, total)` is referenced exactly once.
    pub fn validate_bijection(&self, total: usize) -> Result<(), MeshRepartError> {
        if self.entries.len() != total {
            return Err(MeshRepartError::SlotOutOfBounds {
                slot: self.entries.len(),
                len: total,
            });
        }
        let mut seen = vec![false; total];
        for &(id, slot) in &self.entries {
            let s = slot as usize;
            if s >= total {
                return Err(MeshRepartError::SlotOutOfBounds { slot: s, len: total });
            }
            if seen[s] {
                return Err(MeshRepartError::DuplicateGlobalId(id));
            }
            seen[s] = true;
        }
        Ok(())
    }
}

impl DebugInvariants for GlobalLocalIndex {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "GlobalLocalIndex invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshRepartError> {
        if self.sorted {
            if let Some(w) = self.entries.windows(2).find(|w| w[0].0 >= w[1].0) {
                return Err(MeshRepartError::DuplicateGlobalId(w[1].0));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(GlobalId, u32)]) -> GlobalLocalIndex {
        let mut idx = GlobalLocalIndex::new();
        for &(id, slot) in pairs {
            idx.insert_blindly(id, slot);
        }
        idx.sort_keys().unwrap();
        idx
    }

    #[test]
    fn insert_sort_and_find() {
        let idx = build(&[
            (GlobalId::element(0), 2),
            (GlobalId::node(5), 1),
            (GlobalId::node(1), 0),
        ]);
        assert_eq!(idx.find(GlobalId::node(1)), Some(0));
        assert_eq!(idx.find(GlobalId::node(5)), Some(1));
        assert_eq!(idx.find(GlobalId::element(0)), Some(2));
        assert_eq!(idx.find(GlobalId::node(0)), None);
        idx.debug_assert_invariants();
    }

    #[test]
    fn duplicate_keys_rejected_on_sort() {
        let mut idx = GlobalLocalIndex::new();
        idx.insert_blindly(GlobalId::node(3), 0);
        idx.insert_blindly(GlobalId::node(3), 1);
        assert_eq!(
            idx.sort_keys(),
            Err(MeshRepartError::DuplicateGlobalId(GlobalId::node(3)))
        );
    }

    #[test]
    fn unsorted_lookup_still_resolves() {
        let mut idx = GlobalLocalIndex::new();
        idx.insert_blindly(GlobalId::node(9), 0);
        idx.insert_blindly(GlobalId::node(2), 1);
        assert_eq!(idx.find(GlobalId::node(2)), Some(1));
    }

    #[test]
    fn bijection_check() {
        let idx = build(&[(GlobalId::node(0), 0), (GlobalId::node(1), 1)]);
        idx.validate_bijection(2).unwrap();
        assert!(idx.validate_bijection(3).is_err());

        let bad = build(&[(GlobalId::node(0), 0), (GlobalId::node(1), 0)]);
        assert!(matches!(
            bad.validate_bijection(2),
            Err(MeshRepartError::DuplicateGlobalId(_))
        ));
    }

    #[test]
    fn version_bumps_on_mutation() {
        let mut idx = GlobalLocalIndex::new();
        let v0 = idx.version();
        idx.insert_blindly(GlobalId::node(0), 0);
        assert_ne!(idx.version(), v0);
        let v1 = idx.version();
        idx.sort_keys().unwrap();
        assert_ne!(idx.version(), v1);
    }

    #[test]
    fn rebuild_replaces_contents() {
        let mut idx = build(&[(GlobalId::node(0), 0), (GlobalId::node(1), 1)]);
        idx.rebuild([(GlobalId::node(1), 0)]).unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.find(GlobalId::node(1)), Some(0));
        assert_eq!(idx.find(GlobalId::node(0)), None);
    }

    #[test]
    fn serde_roundtrip() {
        let idx = build(&[(GlobalId::node(4), 0), (GlobalId::element(4), 1)]);
        let ser = serde_json::to_string(&idx).expect("serialize");
        let de: GlobalLocalIndex = serde_json::from_str(&ser).expect("deserialize");
        assert_eq!(de.find(GlobalId::element(4)), Some(1));
    }
}
