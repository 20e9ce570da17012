//! Stage 1 of every cross-rank transfer: exchange byte counts with each peer.
//!
//! Payload sizes are not known mesh-wide in advance, so the sizing phase runs
//! symmetrically with *every* other rank: a rank with nothing to send still
//! announces zero, and every rank learns exactly how many bytes to expect
//! before posting the payload receives. All send/receive handles are drained
//! before returning, even if an error occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::repart_error::MeshRepartError;
use std::collections::HashMap;

/// Announces the byte length of each outgoing buffer to every peer and
/// returns a map `peer → incoming byte count` once all receives completed.
///
/// `outgoing` holds one buffer per destination rank; peers absent from the
/// map are announced a zero count.
pub fn exchange_sizes_symmetric<C>(
    outgoing: &HashMap<usize, Vec<u8>>,
    comm: &C,
    tag: CommTag,
) -> Result<HashMap<usize, usize>, MeshRepartError>
where
    C: Communicator,
{
    let my_rank = comm.rank();
    let size = comm.size();

    // 1) post all receives (storing each count buffer alongside its handle)
    let mut recv_size: Vec<(usize, C::RecvHandle)> = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != my_rank) {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            peer,
            tag.base(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_size.push((peer, h));
    }

    // 2) post all sends and keep buffers alive until completion
    let mut pending_sends = Vec::with_capacity(size.saturating_sub(1));
    let mut send_bufs = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != my_rank) {
        let count = WireCount::new(outgoing.get(&peer).map_or(0, |b| b.len()));
        pending_sends.push(comm.isend(
            peer,
            tag.base(),
            cast_slice(std::slice::from_ref(&count)),
        ));
        send_bufs.push(count);
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = HashMap::new();
    let mut maybe_err = None;
    for (peer, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                if maybe_err.is_none() {
                    let mut cnt = WireCount::new(0);
                    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                    sizes_in.insert(peer, cnt.get());
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    )
                    .into(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!("failed to receive size from rank {peer}").into(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::RayonComm;
    use serial_test::serial;

    #[test]
    #[serial]
    fn sizes_across_three_ranks() {
        let tag = CommTag(0x7100);
        let handles: Vec<_> = (0..3usize)
            .map(|r| {
                std::thread::spawn(move || {
                    let comm = RayonComm::new(r, 3);
                    // rank r sends r+1 bytes to every other rank
                    let mut outgoing = HashMap::new();
                    for peer in (0..3).filter(|&p| p != r) {
                        outgoing.insert(peer, vec![0u8; r + 1]);
                    }
                    exchange_sizes_symmetric(&outgoing, &comm, tag).unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (r, sizes) in results.iter().enumerate() {
            for peer in (0..3).filter(|&p| p != r) {
                assert_eq!(sizes[&peer], peer + 1);
            }
        }
    }

    #[test]
    #[serial]
    fn absent_peers_announce_zero() {
        let tag = CommTag(0x7101);
        let h0 = std::thread::spawn(move || {
            let comm = RayonComm::new(0, 2);
            exchange_sizes_symmetric(&HashMap::new(), &comm, tag).unwrap()
        });
        let h1 = std::thread::spawn(move || {
            let comm = RayonComm::new(1, 2);
            let mut outgoing = HashMap::new();
            outgoing.insert(0usize, vec![1u8, 2, 3]);
            exchange_sizes_symmetric(&outgoing, &comm, tag).unwrap()
        });
        let s0 = h0.join().unwrap();
        let s1 = h1.join().unwrap();
        assert_eq!(s0[&1], 3);
        assert_eq!(s1[&0], 0);
    }
}
