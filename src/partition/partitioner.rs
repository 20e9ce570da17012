//! `MeshPartition`: the per-rank handle tying the subsystem together.
//!
//! Owns the ownership hash, the local registry, the global→local index, the
//! pending change set and the migration engine, and exposes the stable
//! contract the solver/field layer depends on: `localize`/`delocalize`,
//! `is_ghost`, `report`, `migrate` and the cached comm pattern.
//!
//! The communication context is passed in explicitly at construction and
//! threaded through every collective step; no component reads a
//! process-wide singleton.

use crate::algs::communicator::{Communicator, TAG_REDUCE, all_reduce_sum};
use crate::index::global_id::{EntityKind, GlobalId};
use crate::index::global_local::GlobalLocalIndex;
use crate::index::hash::OwnershipHash;
use crate::index::registry::{LocalRegistry, RowStatus};
use crate::mesh::MeshParts;
use crate::partition::change_set::ChangeSet;
use crate::partition::migration::{MigrationEngine, MigrationPhase};
use crate::partition::pattern::{CommPattern, build_comm_pattern};
use crate::repart_error::MeshRepartError;

/// Per-rank partitioning state for one distributed mesh.
pub struct MeshPartition<C: Communicator> {
    comm: C,
    nb_parts: usize,
    hash: OwnershipHash,
    registry: LocalRegistry,
    index: GlobalLocalIndex,
    changes: ChangeSet,
    engine: MigrationEngine,
    pattern: Option<CommPattern>,
    /// Hash-owned rows tallied during the last `initialize`.
    nb_owned: u64,
    initialized: bool,
}

impl<C: Communicator> MeshPartition<C> {
    /// One partition per rank, the common deployment.
    pub fn new(comm: C) -> Self {
        let nb_parts = comm.size();
        Self::with_nb_parts(comm, nb_parts)
    }

    /// Explicit partition count (may exceed the rank count; contiguous
    /// partition groups then share a rank).
    pub fn with_nb_parts(comm: C, nb_parts: usize) -> Self {
        let hash = OwnershipHash::new(&comm, 0, 0, nb_parts.max(1));
        Self {
            comm,
            nb_parts: nb_parts.max(1),
            hash,
            registry: LocalRegistry::new(),
            index: GlobalLocalIndex::new(),
            changes: ChangeSet::new(),
            engine: MigrationEngine::new(),
            pattern: None,
            nb_owned: 0,
            initialized: false,
        }
    }

    /// Ingests the mesh tables and builds the global→local index for one
    /// partitioning round.
    ///
    /// Collective: ends with the mesh-wide owned-tally check, an all-reduce
    /// over every rank. A tally that disagrees with the supplied totals is a
    /// fatal consistency error — the hash banding and the mesh totals have
    /// diverged.
    pub fn initialize(&mut self, parts: MeshParts) -> Result<(), MeshRepartError> {
        parts.validate()?;
        self.hash
            .reconfigure(parts.total_nodes, parts.total_elements, self.nb_parts);

        self.registry = LocalRegistry::new();
        self.index = GlobalLocalIndex::new();
        self.pattern = None;
        self.nb_owned = 0;

        // Nodes first, then elements, in registration order; both
        // namespaces are tallied against the hash.
        for block in parts.node_blocks {
            let mut owners = Vec::with_capacity(block.len());
            for &raw in &block.global_ids {
                let id = GlobalId::node(raw);
                let owner = self.hash.rank_of_partition(self.hash.owner(id)?)?;
                if owner == self.comm.rank() {
                    self.nb_owned += 1;
                }
                owners.push(owner as u32);
            }
            self.registry.push_nodes(block, owners)?;
        }
        for block in parts.element_blocks {
            let mut owners = Vec::with_capacity(block.len());
            for &raw in &block.global_ids {
                let id = GlobalId::element(raw);
                let owner = self.hash.rank_of_partition(self.hash.owner(id)?)?;
                if owner == self.comm.rank() {
                    self.nb_owned += 1;
                }
                owners.push(owner as u32);
            }
            self.registry.push_elements(block, owners)?;
        }

        let total = self.registry.total_len();
        self.index.reserve(total);
        for (slot, e, off) in self.registry.iter_rows() {
            let id = self.registry.entry(e)?.global_id(off)?;
            self.index.insert_blindly(id, slot as u32);
        }
        self.index.sort_keys()?;
        self.index.validate_bijection(total)?;

        let expected = parts.total_nodes + parts.total_elements;
        let found = all_reduce_sum(&self.comm, TAG_REDUCE, self.nb_owned)?;
        if found != expected {
            return Err(MeshRepartError::OwnedTallyMismatch { expected, found });
        }

        self.initialized = true;
        log::debug!(
            "rank {}: initialized {} slots ({} hash-owned)",
            self.comm.rank(),
            total,
            self.nb_owned
        );
        Ok(())
    }

    /// Resolves a tagged global id to (registry entry, intra-entry offset).
    pub fn localize(&self, id: GlobalId) -> Result<(usize, usize), MeshRepartError> {
        let slot = self
            .index
            .find(id)
            .ok_or(MeshRepartError::GlobalIdNotFound(id))?;
        self.registry.locate(slot as usize)
    }

    /// Resolves a dense local slot to (registry entry, intra-entry offset).
    pub fn delocalize(&self, slot: usize) -> Result<(usize, usize), MeshRepartError> {
        self.registry.locate(slot)
    }

    /// True iff the row at `slot` is stored locally but owned elsewhere.
    pub fn is_ghost(&self, slot: usize) -> Result<bool, MeshRepartError> {
        self.registry.is_ghost(slot, self.comm.rank())
    }

    /// Replaces the pending change set (oracle output for this round).
    pub fn set_changes(&mut self, changes: ChangeSet) {
        self.changes = changes;
    }

    /// The pending change set.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    /// Renders one export record per pending transfer, resolving each id to
    /// its local storage and its destination rank. Records are also emitted
    /// through the log facade. Read-only and safe at any time.
    pub fn report(&self) -> Result<Vec<String>, MeshRepartError> {
        if self.changes.is_empty() {
            let notice = "no changes in partitions".to_string();
            log::info!("{notice}");
            return Ok(vec![notice]);
        }
        let mut records = Vec::with_capacity(self.changes.len());
        for (id, part) in self.changes.iter() {
            let (entry, offset) = self.localize(id)?;
            let rank = self.hash.rank_of_partition(part as usize)?;
            let record = format!(
                "export {id} to part {part} (rank {rank}) from entry[{entry}][{offset}]"
            );
            log::info!("{record}");
            records.push(record);
        }
        Ok(records)
    }

    /// Executes the pending ownership transfers: pack → exchange → unpack →
    /// ghost resolution. Collective across all ranks; consumes and clears
    /// the change set and invalidates the cached comm pattern.
    pub fn migrate(&mut self) -> Result<(), MeshRepartError> {
        if !self.initialized {
            return Err(MeshRepartError::Uninitialized("migrate"));
        }
        self.engine.migrate(
            &self.comm,
            &self.hash,
            &mut self.registry,
            &mut self.index,
            &mut self.changes,
        )?;
        self.pattern = None;
        Ok(())
    }

    /// The comm pattern for the current layout: built on first request,
    /// cached, and re-derived lazily once the index or registry changed.
    ///
    /// Collective on (re)build: every rank must request it together.
    pub fn comm_pattern(&mut self) -> Result<&CommPattern, MeshRepartError> {
        if !self.initialized {
            return Err(MeshRepartError::Uninitialized("comm_pattern"));
        }
        let fresh = (self.index.version(), self.registry.version());
        let stale = self
            .pattern
            .as_ref()
            .is_none_or(|p| p.built_against() != fresh);
        if stale {
            self.pattern = Some(build_comm_pattern(&self.comm, &self.registry, &self.index)?);
        }
        Ok(self.pattern.as_ref().expect("pattern just built"))
    }

    /// Drops vacated rows and atomically remaps slots and index entries.
    /// Local operation; slot numbers issued before this call are invalid
    /// afterwards.
    pub fn compact(&mut self) -> Result<usize, MeshRepartError> {
        let dropped = self.registry.compact(&mut self.index)?;
        self.pattern = None;
        Ok(dropped)
    }

    /// Number of live rows currently owned by this rank.
    pub fn owned_rows(&self) -> usize {
        self.registry
            .iter_rows()
            .filter(|&(_, e, off)| {
                let entry = self.registry.entry(e).expect("entry in range");
                entry.status(off) == RowStatus::Live
                    && entry.owner_rank(off) as usize == self.comm.rank()
            })
            .count()
    }

    /// Hash-owned rows tallied by the last `initialize`.
    pub fn nb_owned(&self) -> u64 {
        self.nb_owned
    }

    /// Current protocol phase of the migration engine.
    pub fn migration_phase(&self) -> MigrationPhase {
        self.engine.phase()
    }

    pub fn hash(&self) -> &OwnershipHash {
        &self.hash
    }

    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    pub fn index(&self) -> &GlobalLocalIndex {
        &self.index
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn nb_parts(&self) -> usize {
        self.nb_parts
    }

    /// Kind of the entity stored at a local slot.
    pub fn kind_of_slot(&self, slot: usize) -> Result<EntityKind, MeshRepartError> {
        let (entry, _) = self.registry.locate(slot)?;
        Ok(self.registry.entry(entry)?.kind())
    }
}
