#![allow(missing_docs)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use quadra::storage::btree::{BTree, BTreeOptions, RecordComparator};
use quadra::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

/// Orders records by their leading 4-byte key; the payload does not take
/// part in identity.
struct KeyPrefix;

impl RecordComparator for KeyPrefix {
    fn compare(&self, key: &[u8], record: &[u8]) -> Ordering {
        key[..4].cmp(&record[..4])
    }
}

fn options() -> BTreeOptions {
    BTreeOptions {
        block_size: 128,
        force_sync: false,
        node_cache_size: 16,
        max_dirty_nodes: 8,
    }
}

fn record(key: u32, payload: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&key.to_be_bytes());
    out[4..].copy_from_slice(&payload.to_be_bytes());
    out
}

fn split(bytes: &[u8]) -> (u32, u32) {
    let key = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let payload = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (key, payload)
}

fn open(path: &Path) -> Result<BTree> {
    BTree::open(path, 8, Arc::new(KeyPrefix), &options())
}

fn contents(tree: &BTree) -> Result<Vec<(u32, u32)>> {
    tree.iterate_all()
        .map(|item| item.map(|bytes| split(&bytes)))
        .collect()
}

fn populate(
    tree: &BTree,
    seed: u64,
    rounds: usize,
    reference: &mut BTreeMap<u32, u32>,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for _ in 0..rounds {
        let key = rng.gen_range(0..1_500u32);
        if rng.gen_bool(0.75) {
            let payload = rng.gen_range(0..16u32);
            let old = tree.insert(&record(key, payload))?;
            assert_eq!(old.map(|bytes| split(&bytes).1), reference.insert(key, payload));
        } else {
            let removed = tree.remove(&record(key, 0))?;
            assert_eq!(removed.map(|bytes| split(&bytes).1), reference.remove(&key));
        }
    }
    Ok(())
}

#[test]
fn keyed_records_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("keyed.dat");
    let reference = {
        let tree = open(&path)?;
        let mut reference = BTreeMap::new();
        populate(&tree, 0xb7ee, 4_000, &mut reference)?;
        tree.sync()?;
        tree.close()?;
        reference
    };

    let tree = open(&path)?;
    assert!(tree.pending_journal()?.is_none());
    let want: Vec<(u32, u32)> = reference.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(contents(&tree)?, want);

    let summary = tree.check_structure()?;
    assert_eq!(summary.records, reference.len() as u64);
    assert!(summary.depth >= 2);

    for (key, payload) in reference.iter().take(50) {
        let found = tree.get(&record(*key, u32::MAX))?;
        assert_eq!(found.map(|bytes| split(&bytes)), Some((*key, *payload)));
    }
    Ok(())
}

#[test]
fn range_and_payload_mask_scans() -> Result<()> {
    let dir = tempdir()?;
    let tree = open(&dir.path().join("scan.dat"))?;
    let mut reference = BTreeMap::new();
    populate(&tree, 42, 3_000, &mut reference)?;

    let range: Vec<(u32, u32)> = tree
        .iterate_range(&record(200, 0), &record(400, 0))
        .map(|item| item.map(|bytes| split(&bytes)))
        .collect::<Result<_>>()?;
    let want: Vec<(u32, u32)> = reference
        .range(200..=400)
        .map(|(k, v)| (*k, *v))
        .collect();
    assert_eq!(range, want);

    let mask = [0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff];
    let sevens: Vec<u32> = tree
        .iterate_values(&record(0, 7), &mask)
        .map(|item| item.map(|bytes| split(&bytes).0))
        .collect::<Result<_>>()?;
    let want: Vec<u32> = reference
        .iter()
        .filter(|(_, v)| **v == 7)
        .map(|(k, _)| *k)
        .collect();
    assert_eq!(sevens, want);

    let windowed: Vec<u32> = tree
        .iterate_range_values(&record(0, 7), &mask, &record(0, 0), &record(700, 0))
        .map(|item| item.map(|bytes| split(&bytes).0))
        .collect::<Result<_>>()?;
    let want: Vec<u32> = want.into_iter().filter(|k| *k <= 700).collect();
    assert_eq!(windowed, want);
    Ok(())
}

#[test]
fn unsynced_writes_are_undone_after_crash() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("crash.dat");
    let committed = {
        let tree = open(&path)?;
        let mut committed = BTreeMap::new();
        populate(&tree, 7, 2_000, &mut committed)?;
        tree.sync()?;
        populate(&tree, 8, 2_000, &mut committed.clone())?;
        tree.flush()?;
        // dropped without a checkpoint
        committed
    };

    let tree = open(&path)?;
    if tree.pending_journal()?.is_some() {
        tree.undo()?;
    }
    let want: Vec<(u32, u32)> = committed.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(contents(&tree)?, want);
    assert_eq!(tree.check_structure()?.records, committed.len() as u64);
    Ok(())
}
