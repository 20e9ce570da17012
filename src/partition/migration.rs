//! `MigrationEngine`: executes the pack → exchange → unpack →
//! ghost-resolution protocol of one rebalance round.
//!
//! A single `migrate` call drives the full cycle
//! `Idle → Packing → Exchanging → Unpacking → GhostRequesting →
//! GhostExchanging → GhostUnpacking → Idle`; no concurrent migrate may run
//! until the cycle returns to idle. Every exchange step is the two-phase
//! sizes-then-payload protocol, so it is a synchronous barrier across all
//! ranks — a rank with an empty change set still participates.
//!
//! Once started, the cycle must run to completion: a rank that fails
//! mid-protocol surfaces the error and stays out of `Idle` (there is no
//! transactional rollback; peers blocked in a matching collective are not
//! released — the documented liveness gap of this core).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use itertools::Itertools;

use crate::algs::communicator::{
    Communicator, TAG_GHOST_REPLY, TAG_GHOST_REQUEST, TAG_MIGRATE,
};
use crate::algs::exchange::{exchange_payloads, exchange_sizes_symmetric};
use crate::algs::wire::{RowReader, WireId, WireRowHdr, cast_slice, push_row};
use crate::index::global_id::{EntityKind, GlobalId};
use crate::index::global_local::GlobalLocalIndex;
use crate::index::hash::OwnershipHash;
use crate::index::registry::{BlockData, LocalRegistry, RowStatus};
use crate::mesh::{ElementBlock, NodeBlock};
use crate::partition::change_set::ChangeSet;
use crate::repart_error::MeshRepartError;

/// Protocol state of the engine; transitions are strictly ordered.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MigrationPhase {
    #[default]
    Idle,
    Packing,
    Exchanging,
    Unpacking,
    GhostRequesting,
    GhostExchanging,
    GhostUnpacking,
}

impl MigrationPhase {
    pub const fn name(self) -> &'static str {
        match self {
            MigrationPhase::Idle => "idle",
            MigrationPhase::Packing => "packing",
            MigrationPhase::Exchanging => "exchanging",
            MigrationPhase::Unpacking => "unpacking",
            MigrationPhase::GhostRequesting => "ghost-requesting",
            MigrationPhase::GhostExchanging => "ghost-exchanging",
            MigrationPhase::GhostUnpacking => "ghost-unpacking",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Executes ownership transfers against the local registry and index.
#[derive(Debug, Default)]
pub struct MigrationEngine {
    phase: MigrationPhase,
}

impl MigrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current protocol phase (idle between rounds).
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Runs one full migration cycle. Collective: every rank must call this
    /// together, even with an empty change set.
    ///
    /// On success the change set is cleared and the engine returns to idle.
    /// On failure the engine keeps the phase it failed in and the round is
    /// aborted; ranks that already mutated their local state keep it.
    pub fn migrate<C: Communicator>(
        &mut self,
        comm: &C,
        hash: &OwnershipHash,
        registry: &mut LocalRegistry,
        index: &mut GlobalLocalIndex,
        changes: &mut ChangeSet,
    ) -> Result<(), MeshRepartError> {
        if self.phase != MigrationPhase::Idle {
            return Err(MeshRepartError::MigrationInProgress {
                phase: self.phase.name(),
            });
        }
        let my_rank = comm.rank();

        // --- Packing: one buffer per destination rank, not per object ---
        self.phase = MigrationPhase::Packing;
        log::debug!("migration: packing {} pending transfers", changes.len());

        let mut outgoing: HashMap<usize, Vec<u8>> = HashMap::new();
        // (entry, offset, dest rank) of rows leaving this rank
        let mut sent_nodes: Vec<(usize, usize, u32)> = Vec::new();
        let mut sent_elems: Vec<(usize, usize, u32)> = Vec::new();

        for (id, dest_part) in changes.iter() {
            let dest_rank = hash.rank_of_partition(dest_part as usize)?;
            let slot = index
                .find(id)
                .ok_or(MeshRepartError::GlobalIdNotFound(id))?;
            let (entry_i, off) = registry.locate(slot as usize)?;
            let entry = registry.entry(entry_i)?;
            if entry.status(off) != RowStatus::Live || entry.owner_rank(off) as usize != my_rank {
                return Err(MeshRepartError::NotOwned { id });
            }
            if dest_rank == my_rank {
                // transfer between partitions hosted on the same rank; no
                // data movement, ownership record unchanged
                continue;
            }
            let buf = outgoing.entry(dest_rank).or_default();
            match entry.data() {
                BlockData::Nodes(b) => {
                    let coords = &b.coords[off];
                    let conn = &b.elem_connectivity[off];
                    push_row(
                        buf,
                        WireRowHdr::new(id.get(), coords.len(), conn.len(), dest_rank as u32),
                        coords,
                        conn,
                    );
                    sent_nodes.push((entry_i, off, dest_rank as u32));
                }
                BlockData::Elements(b) => {
                    let conn = &b.connectivity[off];
                    push_row(
                        buf,
                        WireRowHdr::new(id.get(), 0, conn.len(), dest_rank as u32),
                        &[],
                        conn,
                    );
                    sent_elems.push((entry_i, off, dest_rank as u32));
                }
            }
        }

        // --- Exchanging: sizes first, then the payloads they announce ---
        self.phase = MigrationPhase::Exchanging;
        let sizes = exchange_sizes_symmetric(&outgoing, comm, TAG_MIGRATE)?;
        let payloads = exchange_payloads(&outgoing, &sizes, comm, TAG_MIGRATE.offset(1))?;

        // --- Unpacking ---
        self.phase = MigrationPhase::Unpacking;

        // Rows that left: elements are vacated, nodes are retained as ghost
        // copies (retained connectivity may still reference them) with the
        // owner redirected to the destination.
        for &(entry_i, off, dest) in &sent_nodes {
            registry.set_owner_rank(entry_i, off, dest)?;
        }
        for &(entry_i, off, dest) in &sent_elems {
            registry.mark_vacated(entry_i, off)?;
            registry.set_owner_rank(entry_i, off, dest)?;
        }

        let mut recv_nodes = NodeBlock::new();
        let mut recv_elems = ElementBlock::new();
        // connectivity of every received element row, for ghost resolution
        let mut received_conn: Vec<u64> = Vec::new();

        for (peer, payload) in payloads.into_iter().sorted_by_key(|&(p, _)| p) {
            let mut reader = RowReader::new(&payload);
            loop {
                let row = match reader.next_row() {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(()) => {
                        return Err(MeshRepartError::TruncatedPayload {
                            neighbor: peer,
                            expected: payload.len(),
                            found: payload.len() - reader.remaining(),
                        });
                    }
                };
                let id = GlobalId::from_tagged(row.hdr.gid());
                match id.kind() {
                    EntityKind::Node => {
                        if let Some(slot) = index.find(id) {
                            // repatriated or previously ghosted row: refresh
                            // in place, now owned here
                            let (e, o) = registry.locate(slot as usize)?;
                            registry.restore_node_row(e, o, my_rank as u32, row.coords, row.conn)?;
                        } else {
                            recv_nodes.push_row(row.coords, id.raw(), row.conn);
                        }
                    }
                    EntityKind::Element => {
                        received_conn.extend_from_slice(&row.conn);
                        if let Some(slot) = index.find(id) {
                            let (e, o) = registry.locate(slot as usize)?;
                            registry.restore_element_row(e, o, my_rank as u32, row.conn)?;
                        } else {
                            recv_elems.push_row(row.conn, id.raw());
                        }
                    }
                }
            }
        }

        let mut index_dirty = false;
        if !recv_nodes.is_empty() {
            let rows = recv_nodes.len();
            let ids: Vec<u64> = recv_nodes.global_ids.clone();
            let entry_i = registry.push_nodes(recv_nodes, vec![my_rank as u32; rows])?;
            let base = registry.starts()[entry_i];
            for (i, raw) in ids.into_iter().enumerate() {
                index.insert_blindly(GlobalId::node(raw), (base + i) as u32);
            }
            index_dirty = true;
        }
        if !recv_elems.is_empty() {
            let rows = recv_elems.len();
            let ids: Vec<u64> = recv_elems.global_ids.clone();
            let entry_i = registry.push_elements(recv_elems, vec![my_rank as u32; rows])?;
            let base = registry.starts()[entry_i];
            for (i, raw) in ids.into_iter().enumerate() {
                index.insert_blindly(GlobalId::element(raw), (base + i) as u32);
            }
            index_dirty = true;
        }
        if index_dirty {
            index.sort_keys()?;
        }

        // --- GhostRequesting: resolve node ids the new rows dangle on ---
        self.phase = MigrationPhase::GhostRequesting;

        let mut missing: BTreeMap<usize, BTreeSet<u64>> = BTreeMap::new();
        for &raw in &received_conn {
            let id = GlobalId::node(raw);
            if index.contains(id) {
                continue;
            }
            let owner = hash.rank_of_partition(hash.owner(id)?)?;
            if owner == my_rank {
                // the hash says this rank owns it, yet it is not here: the
                // hash and the mesh totals have diverged
                return Err(MeshRepartError::GhostNotFound { id, owner });
            }
            missing.entry(owner).or_default().insert(raw);
        }
        log::debug!(
            "migration: requesting {} ghost nodes from {} ranks",
            missing.values().map(BTreeSet::len).sum::<usize>(),
            missing.len()
        );

        // --- GhostExchanging: requests out, then requested payloads back ---
        self.phase = MigrationPhase::GhostExchanging;

        let mut request_bufs: HashMap<usize, Vec<u8>> = HashMap::new();
        for (&owner, raws) in &missing {
            let buf = request_bufs.entry(owner).or_default();
            for &raw in raws {
                let wire = WireId::of(GlobalId::node(raw).get());
                buf.extend_from_slice(cast_slice(std::slice::from_ref(&wire)));
            }
        }
        let req_sizes = exchange_sizes_symmetric(&request_bufs, comm, TAG_GHOST_REQUEST)?;
        let requests_in = exchange_payloads(&request_bufs, &req_sizes, comm, TAG_GHOST_REQUEST.offset(1))?;

        let mut reply_bufs: HashMap<usize, Vec<u8>> = HashMap::new();
        for (peer, payload) in requests_in.into_iter().sorted_by_key(|&(p, _)| p) {
            if payload.len() % 8 != 0 {
                return Err(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!("ghost request not a multiple of 8 bytes: {}", payload.len())
                        .into(),
                });
            }
            let buf = reply_bufs.entry(peer).or_default();
            for chunk in payload.chunks_exact(8) {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                let id = GlobalId::from_tagged(u64::from_le_bytes(word));
                let slot = index.find(id).ok_or(MeshRepartError::GhostNotFound {
                    id,
                    owner: my_rank,
                })?;
                let (e, o) = registry.locate(slot as usize)?;
                let entry = registry.entry(e)?;
                match entry.data() {
                    BlockData::Nodes(b) => {
                        let coords = &b.coords[o];
                        let conn = &b.elem_connectivity[o];
                        push_row(
                            buf,
                            WireRowHdr::new(id.get(), coords.len(), conn.len(), entry.owner_rank(o)),
                            coords,
                            conn,
                        );
                    }
                    BlockData::Elements(_) => {
                        return Err(MeshRepartError::GhostNotFound {
                            id,
                            owner: my_rank,
                        });
                    }
                }
            }
        }
        let reply_sizes = exchange_sizes_symmetric(&reply_bufs, comm, TAG_GHOST_REPLY)?;
        let replies_in = exchange_payloads(&reply_bufs, &reply_sizes, comm, TAG_GHOST_REPLY.offset(1))?;

        // --- GhostUnpacking ---
        self.phase = MigrationPhase::GhostUnpacking;

        let mut ghost_nodes = NodeBlock::new();
        let mut ghost_owners: Vec<u32> = Vec::new();
        for (peer, payload) in replies_in.into_iter().sorted_by_key(|&(p, _)| p) {
            let mut reader = RowReader::new(&payload);
            loop {
                let row = match reader.next_row() {
                    Ok(Some(row)) => row,
                    Ok(None) => break,
                    Err(()) => {
                        return Err(MeshRepartError::TruncatedPayload {
                            neighbor: peer,
                            expected: payload.len(),
                            found: payload.len() - reader.remaining(),
                        });
                    }
                };
                let id = GlobalId::from_tagged(row.hdr.gid());
                if index.contains(id) {
                    continue;
                }
                ghost_nodes.push_row(row.coords, id.raw(), row.conn);
                ghost_owners.push(row.hdr.owner());
            }
        }
        let ghosts_added = ghost_nodes.len();
        if !ghost_nodes.is_empty() {
            let ids: Vec<u64> = ghost_nodes.global_ids.clone();
            let entry_i = registry.push_nodes(ghost_nodes, ghost_owners)?;
            let base = registry.starts()[entry_i];
            for (i, raw) in ids.into_iter().enumerate() {
                index.insert_blindly(GlobalId::node(raw), (base + i) as u32);
            }
            index.sort_keys()?;
        }

        // every requested id must now resolve; a silent drop would leave
        // dangling connectivity
        for (&owner, raws) in &missing {
            for &raw in raws {
                let id = GlobalId::node(raw);
                if !index.contains(id) {
                    return Err(MeshRepartError::GhostNotFound { id, owner });
                }
            }
        }

        log::debug!(
            "migration: sent {} nodes / {} elements, added {} ghost nodes",
            sent_nodes.len(),
            sent_elems.len(),
            ghosts_added
        );

        changes.clear();
        self.phase = MigrationPhase::Idle;
        Ok(())
    }
}
