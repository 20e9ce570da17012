//! Thin façade over intra-process (thread mailbox) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking — the exchange helpers call
//! `.wait()` before they trust that a buffer is ready. Every component of
//! this crate receives its communication context explicitly through this
//! trait; nothing reads a process-wide singleton.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::repart_error::MeshRepartError;

/// Typed message tag. Protocol phases reserve disjoint tag ranges so
/// concurrent exchanges on the same communicator never cross-talk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    /// The raw tag value.
    pub const fn base(self) -> u16 {
        self.0
    }

    /// A tag at a fixed offset from this one (e.g. sizes vs payload).
    pub const fn offset(self, k: u16) -> CommTag {
        CommTag(self.0 + k)
    }
}

/// Tag range for the owned-tally all-reduce.
pub const TAG_REDUCE: CommTag = CommTag(0x0010);
/// Tag range for the migration row exchange (+0 sizes, +1 payload).
pub const TAG_MIGRATE: CommTag = CommTag(0x0100);
/// Tag range for ghost-node requests (+0 sizes, +1 payload).
pub const TAG_GHOST_REQUEST: CommTag = CommTag(0x0200);
/// Tag range for ghost-node replies (+0 sizes, +1 payload).
pub const TAG_GHOST_REPLY: CommTag = CommTag(0x0300);
/// Tag range for comm-pattern derivation (+0 sizes, +1 payload).
pub const TAG_PATTERN: CommTag = CommTag(0x0400);

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of participating ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- RayonComm: intra-process rank simulation over a FIFO mailbox ---

type Key = (usize, usize, u16); // (src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, Mutex<VecDeque<Bytes>>>> = Lazy::new(DashMap::new);

/// Receive handle for [`RayonComm`]; joins the polling thread on `wait`.
pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.buf.lock().take()
    }
}

/// Intra-process communicator: each simulated rank gets its own instance and
/// all instances share one global mailbox. Integration tests run one thread
/// per rank against this backend.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self { rank, size }
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .lock()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                let popped = MAILBOX.get(&key).and_then(|q| q.lock().pop_front());
                if let Some(bytes) = popped {
                    let n = bytes.len().min(buf_len);
                    *slot_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: slot,
            handle: Some(handle),
        }
    }
}

/// Sums `value` over all ranks; every rank receives the mesh-wide total.
///
/// Composed from point-to-point messages so every backend supports it: each
/// rank sends its contribution to every peer and accumulates what it
/// receives. This is a synchronous barrier — a rank that never calls it
/// blocks every participant.
pub fn all_reduce_sum<C: Communicator>(
    comm: &C,
    tag: CommTag,
    value: u64,
) -> Result<u64, MeshRepartError> {
    let my_rank = comm.rank();
    let size = comm.size();
    if size <= 1 {
        return Ok(value);
    }

    let mut recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != my_rank) {
        let mut buf = [0u8; 8];
        let h = comm.irecv(peer, tag.base(), &mut buf);
        recvs.push((peer, h));
    }

    let bytes = value.to_le_bytes();
    let mut pending_sends = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != my_rank) {
        pending_sends.push(comm.isend(peer, tag.base(), &bytes));
    }

    let mut sum = value;
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) if data.len() == 8 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&data);
                sum = sum.wrapping_add(u64::from_le_bytes(word));
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!("expected 8 bytes for reduce word, got {}", data.len()).into(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!("failed to receive reduce word from rank {peer}").into(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sum),
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::datatype::Equivalence;
    use mpi::request::StaticScope;
    use mpi::topology::Communicator as _;
    use mpi::traits::*;

    /// Inter-process communicator over MPI world.
    pub struct MpiComm {
        universe: mpi::environment::Universe,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI initialize failed (already initialized?)");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                universe,
                rank,
                size,
            }
        }

        fn world(&self) -> mpi::topology::SimpleCommunicator {
            self.universe.world()
        }
    }

    /// Waitable wrapper around an in-flight MPI request plus the leaked
    /// buffer backing it; `wait` reclaims the buffer.
    pub struct MpiHandle {
        req: mpi::request::Request<'static, [u8], StaticScope>,
        ptr: *mut u8,
        len: usize,
        receiving: bool,
    }

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let status = self.req.wait();
            let buf = unsafe { Vec::from_raw_parts(self.ptr, self.len, self.len) };
            if self.receiving {
                let n = (status.count(u8::equivalent_datatype()) as usize).min(self.len);
                Some(buf[..n].to_vec())
            } else {
                None
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr = leaked.as_mut_ptr();
            let len = leaked.len();
            let req = self
                .world()
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, leaked, tag as i32);
            MpiHandle {
                req,
                ptr,
                len,
                receiving: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let leaked: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr = leaked.as_mut_ptr();
            let len = leaked.len();
            let req = self
                .world()
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, leaked, tag as i32);
            MpiHandle {
                req,
                ptr,
                len,
                receiving: true,
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
