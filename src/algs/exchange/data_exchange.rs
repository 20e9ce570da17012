//! Stage 2 of every cross-rank transfer: exchange the actual payloads.
//!
//! Receives are posted with the exact sizes learned in stage 1, so no
//! partial/streamed message framing is needed: a receiver always knows the
//! full payload length before the bytes arrive.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::repart_error::MeshRepartError;
use std::collections::HashMap;

/// Sends each outgoing buffer and collects the announced incoming ones.
///
/// `sizes_in` is the `peer → byte count` map from
/// [`exchange_sizes_symmetric`](crate::algs::exchange::exchange_sizes_symmetric);
/// zero-size entries are skipped on both sides. Returns `peer → payload`.
pub fn exchange_payloads<C>(
    outgoing: &HashMap<usize, Vec<u8>>,
    sizes_in: &HashMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<HashMap<usize, Vec<u8>>, MeshRepartError>
where
    C: Communicator,
{
    // 1) post receives for every nonzero announced payload
    let mut recv_data = Vec::new();
    for (&peer, &nbytes) in sizes_in {
        if nbytes == 0 {
            continue;
        }
        let mut buffer = vec![0u8; nbytes];
        let h = comm.irecv(peer, tag.base(), &mut buffer);
        recv_data.push((peer, nbytes, h));
    }

    // 2) send every nonzero outgoing buffer
    let mut pending_sends = Vec::new();
    for (&peer, buf) in outgoing {
        if buf.is_empty() {
            continue;
        }
        pending_sends.push(comm.isend(peer, tag.base(), buf));
    }

    // 3) wait for all recvs, verifying announced lengths
    let mut payloads = HashMap::new();
    let mut maybe_err = None;
    for (peer, expected, h) in recv_data {
        match h.wait() {
            Some(data) if data.len() == expected => {
                if maybe_err.is_none() {
                    payloads.insert(peer, data);
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::TruncatedPayload {
                    neighbor: peer,
                    expected,
                    found: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshRepartError::CommError {
                    neighbor: peer,
                    detail: format!("failed to receive payload from rank {peer}").into(),
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
        None => Ok(payloads),
    }
}
