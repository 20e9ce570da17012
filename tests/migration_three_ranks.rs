//! Three-rank ghost-resolution scenario: an element row whose connectivity
//! references a node owned by a third rank arrives via migration, and the
//! receiver must pull exactly that node from its hash owner.

use mesh_repart::algs::communicator::RayonComm;
use mesh_repart::index::global_id::GlobalId;
use mesh_repart::mesh::{ElementBlock, MeshParts, NodeBlock};
use mesh_repart::partition::partitioner::MeshPartition;
use serial_test::serial;

/// 10 nodes / 3 elements over 3 ranks. Node bands [0-2], [3-6], [7-9];
/// element bands [0], [1], [2]. Rank 1's element references node 7, which
/// rank 2 owns, so rank 1 stores node 7 as a ghost from the start.
fn rank_parts(rank: usize) -> MeshParts {
    let mut nodes = NodeBlock::new();
    let mut elems = ElementBlock::new();
    match rank {
        0 => {
            for raw in 0u64..3 {
                nodes.push_row(vec![raw as f64, 0.0], raw, vec![0]);
            }
            elems.push_row(vec![0, 1, 2], 0);
        }
        1 => {
            for raw in 3u64..7 {
                nodes.push_row(vec![raw as f64, 0.0], raw, vec![1]);
            }
            nodes.push_row(vec![7.0, 0.0], 7, vec![1, 2]);
            elems.push_row(vec![3, 7], 1);
        }
        _ => {
            for raw in 7u64..10 {
                nodes.push_row(vec![raw as f64, 0.0], raw, vec![2]);
            }
            elems.push_row(vec![7, 8, 9], 2);
        }
    }
    MeshParts {
        node_blocks: vec![nodes],
        element_blocks: vec![elems],
        total_nodes: 10,
        total_elements: 3,
    }
}

#[test]
#[serial]
fn ghost_request_reaches_the_hash_owner() {
    let handles: Vec<_> = (0..3usize)
        .map(|rank| {
            std::thread::spawn(move || {
                let mut part = MeshPartition::new(RayonComm::new(rank, 3));
                part.initialize(rank_parts(rank)).unwrap();
                if rank == 1 {
                    // hand element 1 (connectivity [3, 7]) to partition 0
                    part.changes_mut().insert(GlobalId::element(1), 0);
                }
                part.migrate().unwrap();
                part
            })
        })
        .collect();
    let mut parts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let part2 = parts.pop().unwrap();
    let part1 = parts.pop().unwrap();
    let part0 = parts.pop().unwrap();

    // the element landed on rank 0 and every referenced node resolves
    assert!(part0.localize(GlobalId::element(1)).is_ok());
    for raw in [3u64, 7] {
        assert!(part0.localize(GlobalId::node(raw)).is_ok());
    }

    // node 3 was pulled from rank 1, node 7 from rank 2 — each recorded
    // with its authoritative owner
    let slot_n3 = part0.index().find(GlobalId::node(3)).unwrap() as usize;
    let slot_n7 = part0.index().find(GlobalId::node(7)).unwrap() as usize;
    assert!(part0.is_ghost(slot_n3).unwrap());
    assert!(part0.is_ghost(slot_n7).unwrap());
    let (e3, o3) = part0.delocalize(slot_n3).unwrap();
    let (e7, o7) = part0.delocalize(slot_n7).unwrap();
    assert_eq!(part0.registry().entry(e3).unwrap().owner_rank(o3), 1);
    assert_eq!(part0.registry().entry(e7).unwrap().owner_rank(o7), 2);

    // exactly the two missing nodes were ghosted; nothing else was added
    assert_eq!(part0.registry().total_len(), 4 + 1 + 2); // initial rows + elem + ghosts

    // rank 1 vacated its element but kept every node
    assert_eq!(part1.owned_rows(), 4); // nodes 3..=6
    assert!(part1.localize(GlobalId::element(1)).is_ok()); // until compaction

    // rank 2 is untouched apart from having served one ghost request
    assert_eq!(part2.owned_rows(), 4);
    assert_eq!(part2.registry().total_len(), 4);
}
