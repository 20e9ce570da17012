//! Full two-rank rebalance round over the intra-process communicator:
//! initialize, report, migrate an element across ranks, grow the ghost
//! layer, derive the comm pattern, compact.

use mesh_repart::algs::communicator::RayonComm;
use mesh_repart::index::global_id::GlobalId;
use mesh_repart::mesh::{ElementBlock, MeshParts, NodeBlock};
use mesh_repart::partition::partitioner::MeshPartition;
use mesh_repart::repart_error::MeshRepartError;
use serial_test::serial;

/// 6 nodes / 2 elements over 2 ranks. Node bands [0-2] and [3-5]; element
/// bands [0] and [1]. Rank 0 additionally stores node 3 as a ghost because
/// its element references it.
fn rank_parts(rank: usize) -> MeshParts {
    let mut nodes = NodeBlock::new();
    let mut elems = ElementBlock::new();
    match rank {
        0 => {
            nodes.push_row(vec![0.0, 0.0], 0, vec![0]);
            nodes.push_row(vec![1.0, 0.0], 1, vec![0]);
            nodes.push_row(vec![2.0, 0.0], 2, vec![]);
            nodes.push_row(vec![3.0, 0.0], 3, vec![0, 1]);
            elems.push_row(vec![0, 1, 3], 0);
        }
        _ => {
            nodes.push_row(vec![3.0, 0.0], 3, vec![0, 1]);
            nodes.push_row(vec![4.0, 0.0], 4, vec![1]);
            nodes.push_row(vec![5.0, 0.0], 5, vec![1]);
            elems.push_row(vec![3, 4, 5], 1);
        }
    }
    MeshParts {
        node_blocks: vec![nodes],
        element_blocks: vec![elems],
        total_nodes: 6,
        total_elements: 2,
    }
}

#[test]
#[serial]
fn element_transfer_grows_ghost_layer() {
    let handles: Vec<_> = (0..2usize)
        .map(|rank| {
            std::thread::spawn(move || {
                let mut part = MeshPartition::new(RayonComm::new(rank, 2));
                part.initialize(rank_parts(rank)).unwrap();
                assert_eq!(part.nb_owned(), 4);

                if rank == 0 {
                    part.changes_mut().insert(GlobalId::element(0), 1);
                    let records = part.report().unwrap();
                    assert_eq!(
                        records,
                        vec!["export elem 0 to part 1 (rank 1) from entry[1][0]"]
                    );
                }
                part.migrate().unwrap();
                assert!(part.changes().is_empty());

                // derive the pattern collectively on both ranks
                let (send, recv) = {
                    let pattern = part.comm_pattern().unwrap();
                    (
                        pattern.send_to(1 - rank).to_vec(),
                        pattern.recv_from(1 - rank).to_vec(),
                    )
                };
                (part, send, recv)
            })
        })
        .collect();

    let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let (part1, send1, recv1) = results.pop().unwrap();
    let (mut part0, send0, recv0) = results.pop().unwrap();

    // Sender side: the element is no longer locally owned, but its slot
    // stays resolvable until compaction.
    let slot_e0 = part0.index().find(GlobalId::element(0)).unwrap() as usize;
    assert!(!part0.is_ghost(slot_e0).unwrap()); // vacated, not ghost
    assert_eq!(part0.owned_rows(), 3); // nodes 0,1,2
    assert!(part0.localize(GlobalId::element(0)).is_ok());
    // node 3 was a ghost before and still is
    let slot_n3 = part0.index().find(GlobalId::node(3)).unwrap() as usize;
    assert!(part0.is_ghost(slot_n3).unwrap());

    // Receiver side: element arrived at a fresh tail slot and every node it
    // references resolves locally.
    let (entry, offset) = part1.localize(GlobalId::element(0)).unwrap();
    assert_eq!((entry, offset), (2, 0)); // appended tail entry
    for raw in [0u64, 1, 3] {
        assert!(part1.localize(GlobalId::node(raw)).is_ok());
    }
    // nodes 0 and 1 arrived as ghosts owned by rank 0
    for raw in [0u64, 1] {
        let slot = part1.index().find(GlobalId::node(raw)).unwrap() as usize;
        assert!(part1.is_ghost(slot).unwrap());
    }
    assert_eq!(part1.owned_rows(), 5); // nodes 3,4,5 + elem 1 + elem 0

    // Comm pattern: rank 0 pushes nodes 0,1 and pulls node 3; send/recv
    // lists pair element-wise across the two ranks.
    assert_eq!(send0.len(), 2);
    assert_eq!(recv0, vec![slot_n3]);
    assert_eq!(send1.len(), 1);
    assert_eq!(recv1.len(), 2);

    // Compaction reclaims the vacated element row and drops its index entry.
    assert_eq!(part0.compact().unwrap(), 1);
    assert!(matches!(
        part0.localize(GlobalId::element(0)),
        Err(MeshRepartError::GlobalIdNotFound(_))
    ));
    assert!(part0.localize(GlobalId::node(2)).is_ok());
    assert_eq!(part0.registry().total_len(), 4);
}

#[test]
#[serial]
fn empty_change_sets_are_a_collective_noop() {
    let handles: Vec<_> = (0..2usize)
        .map(|rank| {
            std::thread::spawn(move || {
                let mut part = MeshPartition::new(RayonComm::new(rank, 2));
                part.initialize(rank_parts(rank)).unwrap();
                let index_version = part.index().version();
                let registry_version = part.registry().version();
                assert_eq!(part.report().unwrap(), vec!["no changes in partitions"]);
                part.migrate().unwrap();
                assert_eq!(part.index().version(), index_version);
                assert_eq!(part.registry().version(), registry_version);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
#[serial]
fn node_transfer_leaves_a_ghost_copy_behind() {
    let handles: Vec<_> = (0..2usize)
        .map(|rank| {
            std::thread::spawn(move || {
                let mut part = MeshPartition::new(RayonComm::new(rank, 2));
                part.initialize(rank_parts(rank)).unwrap();
                if rank == 0 {
                    // hand node 2 to partition 1
                    part.changes_mut().insert(GlobalId::node(2), 1);
                }
                part.migrate().unwrap();
                part
            })
        })
        .collect();
    let mut parts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let part1 = parts.pop().unwrap();
    let part0 = parts.pop().unwrap();

    // the sender keeps a ghost copy at the old slot
    let slot = part0.index().find(GlobalId::node(2)).unwrap() as usize;
    assert!(part0.is_ghost(slot).unwrap());
    assert_eq!(part0.owned_rows(), 3); // nodes 0,1 and element 0

    // the receiver owns the arrived row at a fresh tail entry
    let (entry, _) = part1.localize(GlobalId::node(2)).unwrap();
    assert_eq!(entry, 2);
    let slot1 = part1.index().find(GlobalId::node(2)).unwrap() as usize;
    assert!(!part1.is_ghost(slot1).unwrap());
}
