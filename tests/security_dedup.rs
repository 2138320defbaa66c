//! Scenario 6: the same descriptor applied to 100 files allocates exactly
//! one $SII entry.

use ntfs_engine::security::reorder_descriptor;
use ntfs_engine::SecurityStore;

#[test]
fn one_hundred_identical_descriptors_dedup_to_a_single_id() {
    let mut store = SecurityStore::new_empty(4096);
    let descriptor = reorder_descriptor(&[1, 0, 4, 128, 0, 0, 0, 0, 0, 0, 0, 0, 20, 0, 0, 0, 0, 0, 0, 0], &[], &[], &[9, 9, 9, 9], &[8, 8, 8, 8]).unwrap();

    let mut ids = Vec::with_capacity(100);
    for _ in 0..100 {
        ids.push(store.add_descriptor(&descriptor).unwrap());
    }

    assert!(ids.iter().all(|id| *id == ids[0]), "every file should share one security id, got {ids:?}");

    let other = reorder_descriptor(&[1, 0, 4, 128, 0, 0, 0, 0, 0, 0, 0, 0, 20, 0, 0, 0, 0, 0, 0, 0], &[], &[], &[1, 1, 1, 1], &[2, 2, 2, 2]).unwrap();
    let other_id = store.add_descriptor(&other).unwrap();
    assert_ne!(other_id, ids[0], "a distinct descriptor must get its own id");

    let problems = store.verify_dual_block_integrity().unwrap();
    assert!(problems.is_empty(), "unexpected dual-block mismatches: {problems:?}");

    assert_eq!(store.get(ids[0]).unwrap().unwrap(), descriptor);
    assert_eq!(store.get(other_id).unwrap().unwrap(), other);
}
