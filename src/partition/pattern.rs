//! Derived communication pattern: which ranks exchange which local rows to
//! keep ghost rows synchronized after a field update.
//!
//! Receive lists fall out of the local owner-rank bookkeeping (every live
//! ghost row is received from its owner). Send lists require one symmetric
//! exchange: each rank announces the ids it ghosts to their owners, and each
//! owner resolves those ids to the local slots it must push. The result is
//! cached by the partition handle and invalidated whenever the index or the
//! registry change (i.e. after every migration).

use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

use crate::algs::communicator::{Communicator, TAG_PATTERN};
use crate::algs::exchange::{exchange_payloads, exchange_sizes_symmetric};
use crate::algs::wire::{WireId, cast_slice};
use crate::index::global_id::GlobalId;
use crate::index::global_local::GlobalLocalIndex;
use crate::index::registry::{LocalRegistry, RowStatus};
use crate::repart_error::MeshRepartError;

/// The cross-rank contract of one data layout: per neighbor rank, the local
/// rows to push and the local ghost rows to overwrite. Send and receive
/// lists pair element-wise with the matching lists on the peer.
#[derive(Clone, Debug, Default)]
pub struct CommPattern {
    send: BTreeMap<usize, Vec<usize>>,
    recv: BTreeMap<usize, Vec<usize>>,
    /// All ghost slots, sorted, for `is_ghost` membership queries.
    ghost_slots: Vec<usize>,
    index_version: u64,
    registry_version: u64,
}

impl CommPattern {
    /// Local slots that must be sent to `rank`.
    pub fn send_to(&self, rank: usize) -> &[usize] {
        self.send.get(&rank).map_or(&[], Vec::as_slice)
    }

    /// Local slots that will be overwritten by data from `rank`.
    pub fn recv_from(&self, rank: usize) -> &[usize] {
        self.recv.get(&rank).map_or(&[], Vec::as_slice)
    }

    /// Ranks this rank exchanges with, in ascending order.
    pub fn neighbor_ranks(&self) -> Vec<usize> {
        self.send
            .keys()
            .chain(self.recv.keys())
            .copied()
            .sorted()
            .dedup()
            .collect()
    }

    /// True iff `slot` holds a ghost row under this pattern.
    pub fn is_ghost(&self, slot: usize) -> bool {
        self.ghost_slots.binary_search(&slot).is_ok()
    }

    /// Number of ghost rows covered by the pattern.
    pub fn nb_ghosts(&self) -> usize {
        self.ghost_slots.len()
    }

    /// The (index, registry) versions this pattern was derived from; the
    /// cache is stale once either differs.
    pub fn built_against(&self) -> (u64, u64) {
        (self.index_version, self.registry_version)
    }
}

/// Derives the pattern for the current registry and index state.
///
/// Collective: every rank must call this together (the send-list half is a
/// symmetric two-phase exchange).
pub fn build_comm_pattern<C: Communicator>(
    comm: &C,
    registry: &LocalRegistry,
    index: &GlobalLocalIndex,
) -> Result<CommPattern, MeshRepartError> {
    let my_rank = comm.rank();

    // Receive side: every live row owned elsewhere, grouped by owner.
    let mut ghost_rows: Vec<(usize, usize, GlobalId)> = Vec::new(); // (owner, slot, id)
    for (slot, e, off) in registry.iter_rows() {
        let entry = registry.entry(e)?;
        if entry.status(off) != RowStatus::Live {
            continue;
        }
        let owner = entry.owner_rank(off) as usize;
        if owner != my_rank {
            ghost_rows.push((owner, slot, entry.global_id(off)?));
        }
    }
    let recv: BTreeMap<usize, Vec<usize>> = ghost_rows
        .iter()
        .map(|&(owner, slot, _)| (owner, slot))
        .into_group_map()
        .into_iter()
        .collect();

    // Announce ghosted ids to their owners.
    let mut requests: HashMap<usize, Vec<u8>> = HashMap::new();
    for &(owner, _, id) in &ghost_rows {
        let wire = WireId::of(id.get());
        requests
            .entry(owner)
            .or_default()
            .extend_from_slice(cast_slice(std::slice::from_ref(&wire)));
    }
    let sizes = exchange_sizes_symmetric(&requests, comm, TAG_PATTERN)?;
    let payloads = exchange_payloads(&requests, &sizes, comm, TAG_PATTERN.offset(1))?;

    // Send side: resolve each announced id to the local slot to push.
    let mut send: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (peer, payload) in payloads.into_iter().sorted_by_key(|&(p, _)| p) {
        if payload.len() % 8 != 0 {
            return Err(MeshRepartError::CommError {
                neighbor: peer,
                detail: format!("pattern request not a multiple of 8 bytes: {}", payload.len())
                    .into(),
            });
        }
        let mut slots = Vec::with_capacity(payload.len() / 8);
        for chunk in payload.chunks_exact(8) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            let id = GlobalId::from_tagged(u64::from_le_bytes(word));
            let slot = index
                .find(id)
                .ok_or(MeshRepartError::GhostNotFound {
                    id,
                    owner: my_rank,
                })?;
            slots.push(slot as usize);
        }
        send.insert(peer, slots);
    }

    let ghost_slots = ghost_rows
        .iter()
        .map(|&(_, slot, _)| slot)
        .sorted()
        .collect();

    log::debug!(
        "comm pattern built: {} ghost rows, {} neighbors",
        ghost_rows.len(),
        send.keys().chain(recv.keys()).sorted().dedup().count()
    );

    Ok(CommPattern {
        send,
        recv,
        ghost_slots,
        index_version: index.version(),
        registry_version: registry.version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::index::global_local::GlobalLocalIndex;
    use crate::index::registry::LocalRegistry;
    use crate::mesh::NodeBlock;

    #[test]
    fn single_rank_pattern_is_empty() {
        let mut reg = LocalRegistry::new();
        let mut nodes = NodeBlock::new();
        nodes.push_row(vec![0.0], 0, vec![]);
        reg.push_nodes(nodes, vec![0]).unwrap();

        let mut index = GlobalLocalIndex::new();
        index.insert_blindly(GlobalId::node(0), 0);
        index.sort_keys().unwrap();

        let pattern = build_comm_pattern(&NoComm, &reg, &index).unwrap();
        assert!(pattern.neighbor_ranks().is_empty());
        assert_eq!(pattern.nb_ghosts(), 0);
        assert!(!pattern.is_ghost(0));
    }
}
