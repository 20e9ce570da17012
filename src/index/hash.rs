//! Deterministic, communication-free ownership hashing.
//!
//! Given the two mesh-wide totals and a partition count, [`OwnershipHash`]
//! assigns every tagged global id to an owning partition by splitting each
//! namespace into near-equal contiguous bands. Every rank derives the same
//! banding table from the same three scalars, so ownership queries never
//! require a network round-trip.

use crate::algs::communicator::Communicator;
use crate::index::global_id::{EntityKind, GlobalId};
use crate::repart_error::MeshRepartError;

/// Pure map from tagged global id to owning partition.
///
/// The rank identity is taken from an explicit communicator handle at
/// construction; the hash itself never communicates.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct OwnershipHash {
    nb_parts: usize,
    nb_ranks: usize,
    local_rank: usize,
    total_nodes: u64,
    total_elements: u64,
    /// Band starts per namespace, `nb_parts + 1` entries each; band `i`
    /// owns the raw id range `[starts[i], starts[i+1])`.
    node_starts: Vec<u64>,
    elem_starts: Vec<u64>,
}

/// Rounded near-equal banding: `starts[i] = round(i * total / nb_parts)`.
fn band_starts(total: u64, nb_parts: usize) -> Vec<u64> {
    let p = nb_parts as u64;
    (0..=p).map(|i| (i * total + p / 2) / p).collect()
}

impl OwnershipHash {
    /// Builds the hash for this rank from the supplied totals.
    pub fn new<C: Communicator>(
        comm: &C,
        total_nodes: u64,
        total_elements: u64,
        nb_parts: usize,
    ) -> Self {
        let mut hash = Self {
            nb_parts: 0,
            nb_ranks: comm.size(),
            local_rank: comm.rank(),
            total_nodes: 0,
            total_elements: 0,
            node_starts: Vec::new(),
            elem_starts: Vec::new(),
        };
        hash.reconfigure(total_nodes, total_elements, nb_parts);
        hash
    }

    /// Re-derives the banding tables for new totals or partition count.
    pub fn reconfigure(&mut self, total_nodes: u64, total_elements: u64, nb_parts: usize) {
        assert!(nb_parts > 0, "partition count must be positive");
        self.nb_parts = nb_parts;
        self.total_nodes = total_nodes;
        self.total_elements = total_elements;
        self.node_starts = band_starts(total_nodes, nb_parts);
        self.elem_starts = band_starts(total_elements, nb_parts);
        log::debug!(
            "ownership hash banded {total_nodes} nodes / {total_elements} elements over {nb_parts} partitions"
        );
    }

    /// Number of configured partitions.
    pub fn nb_parts(&self) -> usize {
        self.nb_parts
    }

    /// The rank this hash was built for.
    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn namespace(&self, kind: EntityKind) -> (&[u64], u64) {
        match kind {
            EntityKind::Node => (&self.node_starts, self.total_nodes),
            EntityKind::Element => (&self.elem_starts, self.total_elements),
        }
    }

    /// The partition owning `id`.
    ///
    /// An id outside the hashed range is a caller programming error and is
    /// reported as [`MeshRepartError::IdOutOfRange`].
    pub fn owner(&self, id: GlobalId) -> Result<usize, MeshRepartError> {
        let (starts, total) = self.namespace(id.kind());
        let raw = id.raw();
        if raw >= total {
            return Err(MeshRepartError::IdOutOfRange { id, total });
        }
        // starts[0] == 0 <= raw, so the partition_point is always >= 1.
        Ok(starts.partition_point(|&s| s <= raw) - 1)
    }

    /// True iff `id`'s owning partition maps to this rank.
    pub fn owns(&self, id: GlobalId) -> Result<bool, MeshRepartError> {
        Ok(self.rank_of_partition(self.owner(id)?)? == self.local_rank)
    }

    /// The rank hosting a partition: contiguous partition groups map onto
    /// ranks, the identity map when the two counts agree.
    pub fn rank_of_partition(&self, part: usize) -> Result<usize, MeshRepartError> {
        if part >= self.nb_parts {
            return Err(MeshRepartError::PartitionOutOfBounds {
                part,
                nb_parts: self.nb_parts,
            });
        }
        Ok(part * self.nb_ranks / self.nb_parts)
    }

    /// The raw id band `[lo, hi)` of one partition in one namespace.
    pub fn band(&self, kind: EntityKind, part: usize) -> Result<(u64, u64), MeshRepartError> {
        if part >= self.nb_parts {
            return Err(MeshRepartError::PartitionOutOfBounds {
                part,
                nb_parts: self.nb_parts,
            });
        }
        let (starts, _) = self.namespace(kind);
        Ok((starts[part], starts[part + 1]))
    }

    /// The raw id range `[lo, hi)` this rank owns in one namespace (the
    /// union of its partitions' bands, which are contiguous by construction).
    pub fn owned_range(&self, kind: EntityKind) -> (u64, u64) {
        let (starts, total) = self.namespace(kind);
        let mut lo = total;
        let mut hi = 0;
        for part in 0..self.nb_parts {
            if part * self.nb_ranks / self.nb_parts == self.local_rank {
                lo = lo.min(starts[part]);
                hi = hi.max(starts[part + 1]);
            }
        }
        if lo > hi { (0, 0) } else { (lo, hi) }
    }
}
