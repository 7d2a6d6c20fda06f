//! End-to-end scenarios for the B+-tree index engine.
//!
//! These tests drive the public surface only: index lifecycle, point
//! operations, ordered scans, and the structural invariant checker,
//! with fanout capped at 4 entries per node so splits, rotations, and
//! merges happen early.

use bptree_index::{
    Config, Database, IndexError, Key, KeyType, PageId, RecordId, Result, TreeConfig,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn small_fanout_db(dir: &tempfile::TempDir) -> Result<Database> {
    let path = dir.path().join("test.db");
    Database::open(Config::new(path).tree_config(TreeConfig::new(4, 4)))
}

fn rid(slot: u32) -> RecordId {
    RecordId::new(PageId::new(0), slot)
}

#[test]
fn empty_lifecycle_survives_reopen() -> Result<()> {
    let dir = tempdir().unwrap();

    {
        let db = small_fanout_db(&dir)?;
        let idx = db.create_index(Some("idx"), KeyType::Int32)?;
        assert_eq!(idx.size(), 0);
        let mut scan = idx.scan()?;
        assert!(!scan.has_next());
        assert_eq!(scan.next()?, None);
        idx.check_invariants()?;
        idx.close();
        db.flush()?;
    }

    {
        let db = small_fanout_db(&dir)?;
        let idx = db.open_index("idx")?;
        assert_eq!(idx.size(), 0);
        let mut scan = idx.scan()?;
        assert_eq!(scan.next()?, None);
        idx.check_invariants()?;
    }

    Ok(())
}

#[test]
fn single_insert_lookup() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    idx.insert(&Key::Int32(42), RecordId::new(PageId::new(7), 3))?;
    assert_eq!(
        idx.lookup(&Key::Int32(42))?,
        Some((Key::Int32(42), RecordId::new(PageId::new(7), 3)))
    );
    assert_eq!(idx.size(), 1);
    Ok(())
}

#[test]
fn sequential_fill_and_scan() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in 1..=20 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
        idx.check_invariants()?;
    }

    let mut scan = idx.scan_from(&Key::Int32(0))?;
    for k in 1..=20 {
        assert_eq!(scan.next()?, Some((Key::Int32(k), rid(k as u32))));
    }
    assert_eq!(scan.next()?, None);
    assert!(!scan.has_next());
    Ok(())
}

#[test]
fn reverse_fill_scans_ascending() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in (1..=20).rev() {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
        idx.check_invariants()?;
    }

    let mut scan = idx.scan()?;
    for k in 1..=20 {
        assert_eq!(scan.next()?, Some((Key::Int32(k), rid(k as u32))));
    }
    assert_eq!(scan.next()?, None);
    Ok(())
}

#[test]
fn duplicate_insert_replaces() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    idx.insert(&Key::Int32(5), rid(5))?;
    idx.insert(&Key::Int32(5), RecordId::new(PageId::new(9), 9))?;
    assert_eq!(
        idx.lookup(&Key::Int32(5))?,
        Some((Key::Int32(5), RecordId::new(PageId::new(9), 9)))
    );
    assert_eq!(idx.size(), 1);
    idx.check_invariants()?;
    Ok(())
}

#[test]
fn delete_to_empty_alternating_outward() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in 1..=100 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }
    idx.check_invariants()?;

    // 50, 49, 51, 48, 52, ... walking outward from the middle
    let mut order = vec![50];
    for d in 1..=50 {
        if 50 - d >= 1 {
            order.push(50 - d);
        }
        if 50 + d <= 100 {
            order.push(50 + d);
        }
    }
    assert_eq!(order.len(), 100);

    for k in order {
        assert!(idx.remove(&Key::Int32(k), rid(k as u32))?, "remove {}", k);
        idx.check_invariants()?;
    }

    assert_eq!(idx.size(), 0);
    let root = idx.export_tree()?;
    assert!(root.is_leaf);
    assert!(root.keys.is_empty());
    Ok(())
}

#[test]
fn remove_absent_leaves_tree_untouched() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in 1..=10 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }
    let before = serde_json::to_string(&idx.export_tree()?).unwrap();

    assert!(!idx.remove(&Key::Int32(999), rid(0))?);
    assert_eq!(idx.size(), 10);

    let after = serde_json::to_string(&idx.export_tree()?).unwrap();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn inserts_then_reverse_removes_drain_completely() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    let keys: Vec<i32> = vec![13, 2, 77, 41, 8, 99, 56, 23, 64, 31, 17, 88, 5, 70, 46];
    for &k in &keys {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }
    for &k in keys.iter().rev() {
        assert!(idx.remove(&Key::Int32(k), rid(k as u32))?);
        idx.check_invariants()?;
    }

    assert_eq!(idx.size(), 0);
    let root = idx.export_tree()?;
    assert!(root.is_leaf);
    assert!(root.keys.is_empty());
    Ok(())
}

#[test]
fn overflow_by_one_splits_once() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    // leaf_max = 4, leaf_min = 2: the fifth ascending key forces one split
    for k in 1..=5 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }

    let root = idx.export_tree()?;
    assert!(!root.is_leaf);
    assert_eq!(root.keys.len(), 1);
    assert_eq!(root.children.len(), 2);
    let mut sizes: Vec<usize> = root.children.iter().map(|c| c.keys.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 3]);

    // Up to 2 * leaf_max + 1 keys: a second split or a redistribution,
    // either way the invariants hold
    for k in 6..=9 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
        idx.check_invariants()?;
    }
    Ok(())
}

#[test]
fn min_occupancy_boundary() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    // Two leaves of sizes 2 and 3
    for k in 1..=5 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }

    // Trim the larger leaf to exactly leaf_min: no merge, still two leaves
    idx.remove(&Key::Int32(5), rid(5))?;
    idx.check_invariants()?;
    let root = idx.export_tree()?;
    assert_eq!(root.children.len(), 2);
    assert!(root.children.iter().all(|c| c.keys.len() == 2));

    // One more removal drops a leaf below minimum; with its sibling at
    // minimum too, the leaves merge and the root collapses
    idx.remove(&Key::Int32(4), rid(4))?;
    idx.check_invariants()?;
    let root = idx.export_tree()?;
    assert!(root.is_leaf);
    assert_eq!(root.keys.len(), 3);
    Ok(())
}

#[test]
fn pin_balance_after_every_operation() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    // Only the header page stays pinned between operations
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);

    for k in 1..=50 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
        assert_eq!(db.buffer_pool().pinned_page_count(), 1);
    }
    idx.lookup(&Key::Int32(25))?;
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);
    assert!(idx.lookup(&Key::Int32(999))?.is_none());
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);
    idx.check_invariants()?;
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);

    // An open scan pins exactly one leaf
    let mut scan = idx.scan()?;
    assert_eq!(db.buffer_pool().pinned_page_count(), 2);
    while scan.next()?.is_some() {
        assert_eq!(db.buffer_pool().pinned_page_count(), 2);
    }
    scan.close();
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);

    for k in 1..=50 {
        idx.remove(&Key::Int32(k), rid(k as u32))?;
        assert_eq!(db.buffer_pool().pinned_page_count(), 1);
    }

    // Errors release their pins too
    assert!(matches!(
        idx.insert(&Key::Int64(1), rid(1)),
        Err(IndexError::InvalidArgument(_))
    ));
    assert_eq!(db.buffer_pool().pinned_page_count(), 1);

    idx.close();
    assert_eq!(db.buffer_pool().pinned_page_count(), 0);
    Ok(())
}

#[test]
fn equality_scan_yields_single_match() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in 1..=20 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }

    let mut eq = idx.scan_equal(&Key::Int32(7))?;
    assert!(eq.has_next());
    assert_eq!(eq.next()?, Some((Key::Int32(7), rid(7))));
    assert!(!eq.has_next());
    assert_eq!(eq.next()?, None);

    let mut miss = idx.scan_equal(&Key::Int32(999))?;
    assert!(!miss.has_next());
    assert_eq!(miss.next()?, None);
    Ok(())
}

#[test]
fn scan_restart_replays_from_start() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    for k in 1..=12 {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }

    let mut scan = idx.scan_from(&Key::Int32(5))?;
    assert_eq!(scan.next()?, Some((Key::Int32(5), rid(5))));
    assert_eq!(scan.next()?, Some((Key::Int32(6), rid(6))));

    scan.restart()?;
    assert_eq!(scan.next()?, Some((Key::Int32(5), rid(5))));
    Ok(())
}

#[test]
fn bytes_keys_order_lexicographically() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Bytes(4))?;

    let words: [&[u8; 4]; 6] = [b"pear", b"plum", b"kiwi", b"fig\0", b"date", b"lime"];
    for (i, w) in words.iter().enumerate() {
        idx.insert(&Key::Bytes(w.to_vec()), rid(i as u32))?;
        idx.check_invariants()?;
    }

    let mut scan = idx.scan()?;
    let mut seen = Vec::new();
    while let Some((Key::Bytes(b), _)) = scan.next()? {
        seen.push(b);
    }
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
    assert_eq!(seen.len(), 6);
    Ok(())
}

#[test]
fn randomized_workload_preserves_invariants() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB17E);

    let mut keys: Vec<i32> = (0..400).collect();
    keys.shuffle(&mut rng);
    for (i, &k) in keys.iter().enumerate() {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
        if i % 25 == 0 {
            idx.check_invariants()?;
        }
    }
    idx.check_invariants()?;
    assert_eq!(idx.size(), 400);

    // Interleave removals with random lookups
    keys.shuffle(&mut rng);
    for (i, &k) in keys.iter().enumerate() {
        assert!(idx.remove(&Key::Int32(k), rid(k as u32))?);
        let probe = rng.gen_range(0..400);
        let hit = idx.lookup(&Key::Int32(probe))?;
        assert_eq!(hit.is_some(), !keys[..=i].contains(&probe));
        if i % 25 == 0 {
            idx.check_invariants()?;
        }
    }
    idx.check_invariants()?;
    assert_eq!(idx.size(), 0);
    Ok(())
}

#[test]
fn scan_from_between_leaves_starts_on_next_leaf() -> Result<()> {
    let dir = tempdir().unwrap();
    let db = small_fanout_db(&dir)?;
    let mut idx = db.create_index(Some("idx"), KeyType::Int32)?;

    // Sparse keys so a probe can fall between two leaves
    for k in (10..=100).step_by(10) {
        idx.insert(&Key::Int32(k), rid(k as u32))?;
    }

    let mut scan = idx.scan_from(&Key::Int32(45))?;
    assert_eq!(scan.next()?, Some((Key::Int32(50), rid(50))));

    let mut past_end = idx.scan_from(&Key::Int32(1000))?;
    assert!(!past_end.has_next());
    assert_eq!(past_end.next()?, None);
    Ok(())
}
