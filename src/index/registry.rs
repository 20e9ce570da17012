//! `LocalRegistry`: ordered catalogue of the locally stored data containers.
//!
//! Each registry entry owns one ingested block (node coordinates or element
//! connectivity) together with per-row bookkeeping: a live/vacated status
//! flag and the owning rank of every row. The concatenation of entry sizes,
//! in registration order, forms the strictly non-decreasing prefix-sum table
//! `starts[0..=K]`; slot `s` belongs to entry `i` iff
//! `starts[i] <= s < starts[i+1]`.
//!
//! Entries are appended, never reordered in place: migration appends new
//! tail entries for received data rather than reshuffling existing ones, so
//! the prefix table stays monotonic without a full rebuild. Rows sent away
//! are only *logically* removed (vacated); their slot numbers stay valid
//! until the explicit [`compact`](LocalRegistry::compact) pass runs.

use crate::debug_invariants::DebugInvariants;
use crate::index::global_id::{EntityKind, GlobalId};
use crate::index::global_local::GlobalLocalIndex;
use crate::mesh::{ElementBlock, NodeBlock};
use crate::repart_error::MeshRepartError;

/// Whether a row still holds authoritative or ghost data, or has been
/// migrated away and awaits compaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RowStatus {
    Live,
    Vacated,
}

/// The data container of one registry entry.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum BlockData {
    Nodes(NodeBlock),
    Elements(ElementBlock),
}

impl BlockData {
    pub fn len(&self) -> usize {
        match self {
            BlockData::Nodes(b) => b.len(),
            BlockData::Elements(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            BlockData::Nodes(_) => EntityKind::Node,
            BlockData::Elements(_) => EntityKind::Element,
        }
    }
}

/// One ingested block plus its per-row bookkeeping.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RegistryEntry {
    data: BlockData,
    status: Vec<RowStatus>,
    owner_rank: Vec<u32>,
}

impl RegistryEntry {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn data(&self) -> &BlockData {
        &self.data
    }

    /// Tagged global id of one row.
    pub fn global_id(&self, offset: usize) -> Result<GlobalId, MeshRepartError> {
        let raw = match &self.data {
            BlockData::Nodes(b) => b.global_ids.get(offset),
            BlockData::Elements(b) => b.global_ids.get(offset),
        }
        .ok_or(MeshRepartError::SlotOutOfBounds {
            slot: offset,
            len: self.len(),
        })?;
        Ok(GlobalId::new(self.kind(), *raw))
    }

    pub fn status(&self, offset: usize) -> RowStatus {
        self.status[offset]
    }

    pub fn owner_rank(&self, offset: usize) -> u32 {
        self.owner_rank[offset]
    }
}

/// Ordered catalogue of local blocks with the prefix-sum slot table.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LocalRegistry {
    entries: Vec<RegistryEntry>,
    /// `entries.len() + 1` offsets; `starts[0] == 0`.
    starts: Vec<usize>,
    /// Monotonic version that changes on any structural modification.
    version: u64,
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            starts: vec![0],
            version: 0,
        }
    }

    /// Appends a node block whose rows are owned by the given ranks.
    pub fn push_nodes(
        &mut self,
        block: NodeBlock,
        owner_rank: Vec<u32>,
    ) -> Result<usize, MeshRepartError> {
        block.validate()?;
        self.push_entry(BlockData::Nodes(block), owner_rank)
    }

    /// Appends an element block whose rows are owned by the given ranks.
    pub fn push_elements(
        &mut self,
        block: ElementBlock,
        owner_rank: Vec<u32>,
    ) -> Result<usize, MeshRepartError> {
        block.validate()?;
        self.push_entry(BlockData::Elements(block), owner_rank)
    }

    fn push_entry(
        &mut self,
        data: BlockData,
        owner_rank: Vec<u32>,
    ) -> Result<usize, MeshRepartError> {
        let rows = data.len();
        if owner_rank.len() != rows {
            return Err(MeshRepartError::BlockLengthMismatch {
                context: "registry owner-rank list",
                expected: rows,
                found: owner_rank.len(),
            });
        }
        let idx = self.entries.len();
        self.entries.push(RegistryEntry {
            data,
            status: vec![RowStatus::Live; rows],
            owner_rank,
        });
        self.starts.push(self.total_len() + rows);
        self.version = self.version.wrapping_add(1);
        self.debug_assert_invariants();
        Ok(idx)
    }

    /// Number of registered entries.
    pub fn nb_entries(&self) -> usize {
        self.entries.len()
    }

    /// Total slot count across all entries.
    pub fn total_len(&self) -> usize {
        *self.starts.last().expect("starts is never empty")
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// The prefix-sum table (one offset per entry, plus the total).
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    /// Monotonic version that changes whenever the registry changes.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn entry(&self, idx: usize) -> Result<&RegistryEntry, MeshRepartError> {
        self.entries
            .get(idx)
            .ok_or(MeshRepartError::EntryOutOfBounds(idx))
    }

    /// Translates a local slot into (entry index, intra-entry offset).
    ///
    /// Passing `slot >= total_len()` is a caller programming error.
    pub fn locate(&self, slot: usize) -> Result<(usize, usize), MeshRepartError> {
        if slot >= self.total_len() {
            return Err(MeshRepartError::SlotOutOfBounds {
                slot,
                len: self.total_len(),
            });
        }
        // starts[0] == 0 <= slot, so the partition_point is always >= 1.
        let i = self.starts.partition_point(|&s| s <= slot) - 1;
        Ok((i, slot - self.starts[i]))
    }

    /// The dense slot of (entry, offset); inverse of [`locate`](Self::locate).
    pub fn slot_of(&self, entry: usize, offset: usize) -> Result<usize, MeshRepartError> {
        let e = self.entry(entry)?;
        if offset >= e.len() {
            return Err(MeshRepartError::SlotOutOfBounds {
                slot: offset,
                len: e.len(),
            });
        }
        Ok(self.starts[entry] + offset)
    }

    /// Iterates every row as (slot, entry index, intra-entry offset).
    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.entries.iter().enumerate().flat_map(move |(i, e)| {
            let base = self.starts[i];
            (0..e.len()).map(move |off| (base + off, i, off))
        })
    }

    /// Marks a row as migrated away; its slot stays valid until compaction.
    pub fn mark_vacated(&mut self, entry: usize, offset: usize) -> Result<(), MeshRepartError> {
        let e = self
            .entries
            .get_mut(entry)
            .ok_or(MeshRepartError::EntryOutOfBounds(entry))?;
        let len = e.len();
        let s = e
            .status
            .get_mut(offset)
            .ok_or(MeshRepartError::SlotOutOfBounds { slot: offset, len })?;
        *s = RowStatus::Vacated;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Rewrites the owning rank of a row (ownership transfer or ghost mark).
    pub fn set_owner_rank(
        &mut self,
        entry: usize,
        offset: usize,
        owner: u32,
    ) -> Result<(), MeshRepartError> {
        let e = self
            .entries
            .get_mut(entry)
            .ok_or(MeshRepartError::EntryOutOfBounds(entry))?;
        let len = e.len();
        let r = e
            .owner_rank
            .get_mut(offset)
            .ok_or(MeshRepartError::SlotOutOfBounds { slot: offset, len })?;
        *r = owner;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Restores a row to live with the given owner and fresh data
    /// (repatriation of a previously vacated or ghost row).
    pub fn restore_node_row(
        &mut self,
        entry: usize,
        offset: usize,
        owner: u32,
        coords: Vec<f64>,
        elem_conn: Vec<u64>,
    ) -> Result<(), MeshRepartError> {
        let e = self
            .entries
            .get_mut(entry)
            .ok_or(MeshRepartError::EntryOutOfBounds(entry))?;
        let len = e.len();
        match &mut e.data {
            BlockData::Nodes(b) if offset < len => {
                b.coords[offset] = coords;
                b.elem_connectivity[offset] = elem_conn;
            }
            _ => {
                return Err(MeshRepartError::SlotOutOfBounds { slot: offset, len });
            }
        }
        e.status[offset] = RowStatus::Live;
        e.owner_rank[offset] = owner;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Restores an element row to live with the given owner and fresh
    /// connectivity.
    pub fn restore_element_row(
        &mut self,
        entry: usize,
        offset: usize,
        owner: u32,
        connectivity: Vec<u64>,
    ) -> Result<(), MeshRepartError> {
        let e = self
            .entries
            .get_mut(entry)
            .ok_or(MeshRepartError::EntryOutOfBounds(entry))?;
        let len = e.len();
        match &mut e.data {
            BlockData::Elements(b) if offset < len => {
                b.connectivity[offset] = connectivity;
            }
            _ => {
                return Err(MeshRepartError::SlotOutOfBounds { slot: offset, len });
            }
        }
        e.status[offset] = RowStatus::Live;
        e.owner_rank[offset] = owner;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// True iff the row at `slot` is live but owned by another rank.
    pub fn is_ghost(&self, slot: usize, my_rank: usize) -> Result<bool, MeshRepartError> {
        let (entry, offset) = self.locate(slot)?;
        let e = &self.entries[entry];
        Ok(e.status[offset] == RowStatus::Live && e.owner_rank[offset] as usize != my_rank)
    }

    /// Drops every vacated row, rebuilds the prefix table, and atomically
    /// rewrites `index` to the remapped slots. Entries left empty are
    /// dropped as well. Returns the number of rows reclaimed.
    ///
    /// Slot numbers issued before this call are invalid afterwards; this is
    /// the only operation that ever reuses a slot number.
    pub fn compact(&mut self, index: &mut GlobalLocalIndex) -> Result<usize, MeshRepartError> {
        let mut new_entries: Vec<RegistryEntry> = Vec::with_capacity(self.entries.len());
        let mut dropped = 0usize;

        for e in &self.entries {
            let keep: Vec<usize> = (0..e.len())
                .filter(|&off| e.status[off] == RowStatus::Live)
                .collect();
            dropped += e.len() - keep.len();
            if keep.is_empty() {
                continue;
            }
            let data = match &e.data {
                BlockData::Nodes(b) => {
                    let mut nb = NodeBlock::new();
                    for &off in &keep {
                        nb.push_row(
                            b.coords[off].clone(),
                            b.global_ids[off],
                            b.elem_connectivity[off].clone(),
                        );
                    }
                    BlockData::Nodes(nb)
                }
                BlockData::Elements(b) => {
                    let mut eb = ElementBlock::new();
                    for &off in &keep {
                        eb.push_row(b.connectivity[off].clone(), b.global_ids[off]);
                    }
                    BlockData::Elements(eb)
                }
            };
            new_entries.push(RegistryEntry {
                data,
                status: vec![RowStatus::Live; keep.len()],
                owner_rank: keep.iter().map(|&off| e.owner_rank[off]).collect(),
            });
        }

        let mut new_starts = Vec::with_capacity(new_entries.len() + 1);
        new_starts.push(0);
        for e in &new_entries {
            new_starts.push(new_starts.last().unwrap() + e.len());
        }

        let mut pairs = Vec::with_capacity(*new_starts.last().unwrap());
        for (i, e) in new_entries.iter().enumerate() {
            for off in 0..e.len() {
                pairs.push((e.global_id(off)?, (new_starts[i] + off) as u32));
            }
        }
        // Rewrite the index first; only then swap the registry, so a failed
        // rebuild leaves the registry untouched.
        index.rebuild(pairs)?;

        self.entries = new_entries;
        self.starts = new_starts;
        self.version = self.version.wrapping_add(1);
        self.debug_assert_invariants();
        log::debug!("compaction reclaimed {dropped} vacated rows");
        Ok(dropped)
    }
}

impl DebugInvariants for LocalRegistry {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "LocalRegistry invalid");
    }

    fn validate_invariants(&self) -> Result<(), MeshRepartError> {
        if self.starts.len() != self.entries.len() + 1 || self.starts[0] != 0 {
            return Err(MeshRepartError::SlotOutOfBounds {
                slot: self.starts.len(),
                len: self.entries.len() + 1,
            });
        }
        let mut expected = 0usize;
        for (i, e) in self.entries.iter().enumerate() {
            if self.starts[i] != expected {
                return Err(MeshRepartError::SlotOutOfBounds {
                    slot: self.starts[i],
                    len: expected,
                });
            }
            if e.status.len() != e.len() || e.owner_rank.len() != e.len() {
                return Err(MeshRepartError::BlockLengthMismatch {
                    context: "registry entry bookkeeping",
                    expected: e.len(),
                    found: e.status.len().min(e.owner_rank.len()),
                });
            }
            expected += e.len();
        }
        if *self.starts.last().unwrap() != expected {
            return Err(MeshRepartError::SlotOutOfBounds {
                slot: *self.starts.last().unwrap(),
                len: expected,
            });
        }
        Ok(())
    }
}
