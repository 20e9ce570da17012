//! MeshRepartError: unified error type for mesh-repart public APIs.
//!
//! Every fallible operation in the crate returns this type so callers can
//! `?`-propagate across the index, migration and communication layers.

use crate::index::global_id::GlobalId;
use thiserror::Error;

/// Unified error type for mesh-repart operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshRepartError {
    /// Lookup of a global id that is not present in the local index.
    #[error("global id {0} not found in the local index")]
    GlobalIdNotFound(GlobalId),
    /// The same global id was registered twice in the local index.
    #[error("duplicate global id {0} in the local index")]
    DuplicateGlobalId(GlobalId),
    /// A local slot beyond the registered slot space was passed in.
    #[error("local slot {slot} out of bounds (total slot count {len})")]
    SlotOutOfBounds { slot: usize, len: usize },
    /// A registry entry index beyond the registered entries was passed in.
    #[error("registry entry {0} out of bounds")]
    EntryOutOfBounds(usize),
    /// A tagged id falls outside the range covered by the ownership hash.
    #[error("id {id} outside the hashed id range (namespace total {total})")]
    IdOutOfRange { id: GlobalId, total: u64 },
    /// A partition index at or beyond the configured partition count.
    #[error("partition {part} out of bounds ({nb_parts} partitions configured)")]
    PartitionOutOfBounds { part: usize, nb_parts: usize },
    /// The mesh-wide owned tally disagrees with the supplied totals.
    ///
    /// The ownership hash banding and the externally supplied mesh totals
    /// have diverged; the distributed index cannot be trusted.
    #[error("mesh-wide owned tally mismatch: expected {expected}, found {found}")]
    OwnedTallyMismatch { expected: u64, found: u64 },
    /// A ghost request resolved to "not found" on the purported owner rank.
    #[error("ghost request for {id} could not be resolved on owner rank {owner}")]
    GhostNotFound { id: GlobalId, owner: usize },
    /// A change set referenced an object this rank does not currently own.
    #[error("change set references {id} which is not locally owned")]
    NotOwned { id: GlobalId },
    /// `migrate` was called while a previous cycle had not returned to idle.
    #[error("migration already in progress (phase {phase})")]
    MigrationInProgress { phase: &'static str },
    /// Point-to-point transfer with a neighbor failed or was malformed.
    #[error("communication with rank {neighbor} failed: {detail}")]
    CommError { neighbor: usize, detail: Box<str> },
    /// A payload arrived with fewer bytes than its announced size.
    #[error("truncated payload from rank {neighbor}: expected {expected} bytes, got {found}")]
    TruncatedPayload {
        neighbor: usize,
        expected: usize,
        found: usize,
    },
    /// Row lists of one mesh block disagree in length.
    #[error("block row lists disagree in length for {context}: {expected} vs {found}")]
    BlockLengthMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    /// An operation that needs a built index was called before `initialize`.
    #[error("partition not initialized: call initialize before {0}")]
    Uninitialized(&'static str),
}
