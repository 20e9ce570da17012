//! Ownership-hash properties: determinism, banding, and the mesh-wide
//! owned-tally identity.

use mesh_repart::algs::communicator::RayonComm;
use mesh_repart::index::global_id::{EntityKind, GlobalId};
use mesh_repart::index::hash::OwnershipHash;
use proptest::prelude::*;

#[test]
fn ten_nodes_over_three_ranks() {
    // bands [0-2], [3-6], [7-9]
    let hash = OwnershipHash::new(&RayonComm::new(0, 3), 10, 0, 3);
    assert_eq!(hash.band(EntityKind::Node, 0).unwrap(), (0, 3));
    assert_eq!(hash.band(EntityKind::Node, 1).unwrap(), (3, 7));
    assert_eq!(hash.band(EntityKind::Node, 2).unwrap(), (7, 10));
    assert_eq!(hash.owner(GlobalId::node(3)).unwrap(), 1);
    assert!(!hash.owns(GlobalId::node(3)).unwrap());
}

#[test]
fn owner_is_deterministic_across_reconstruction() {
    let a = OwnershipHash::new(&RayonComm::new(0, 4), 1000, 250, 4);
    let b = OwnershipHash::new(&RayonComm::new(2, 4), 1000, 250, 4);
    for raw in (0..1000).step_by(13) {
        assert_eq!(
            a.owner(GlobalId::node(raw)).unwrap(),
            b.owner(GlobalId::node(raw)).unwrap()
        );
    }
    for raw in 0..250 {
        assert_eq!(
            a.owner(GlobalId::element(raw)).unwrap(),
            b.owner(GlobalId::element(raw)).unwrap()
        );
    }
}

#[test]
fn owned_tally_sums_to_mesh_totals() {
    // summing owns(x) over all ranks and both namespaces yields N + C
    let (n, c, p) = (23u64, 11u64, 5usize);
    let hashes: Vec<_> = (0..p)
        .map(|r| OwnershipHash::new(&RayonComm::new(r, p), n, c, p))
        .collect();
    let mut tally = 0u64;
    for hash in &hashes {
        for raw in 0..n {
            if hash.owns(GlobalId::node(raw)).unwrap() {
                tally += 1;
            }
        }
        for raw in 0..c {
            if hash.owns(GlobalId::element(raw)).unwrap() {
                tally += 1;
            }
        }
    }
    assert_eq!(tally, n + c);
}

proptest! {
    #[test]
    fn bands_tile_each_namespace_exactly_once(
        total in 0u64..5_000,
        nb_parts in 1usize..32,
    ) {
        let hash = OwnershipHash::new(&RayonComm::new(0, nb_parts), total, total / 2, nb_parts);
        let mut covered = 0u64;
        let mut prev_hi = 0u64;
        for part in 0..nb_parts {
            let (lo, hi) = hash.band(EntityKind::Node, part).unwrap();
            prop_assert!(lo <= hi);
            prop_assert_eq!(lo, prev_hi);
            covered += hi - lo;
            prev_hi = hi;
        }
        prop_assert_eq!(covered, total);
    }

    #[test]
    fn every_id_lands_in_its_owners_band(
        total in 1u64..2_000,
        nb_parts in 1usize..16,
        probe in 0u64..2_000,
    ) {
        prop_assume!(probe < total);
        let hash = OwnershipHash::new(&RayonComm::new(0, nb_parts), total, 0, nb_parts);
        let part = hash.owner(GlobalId::node(probe)).unwrap();
        let (lo, hi) = hash.band(EntityKind::Node, part).unwrap();
        prop_assert!(lo <= probe && probe < hi);
    }
}
