//! Tests for DiskKeyValueStore
//!
//! These tests verify:
//! - Batches become visible only once sealed
//! - Failed batches publish nothing
//! - Prepared batches stay hidden until published, and vanish when discarded
//! - Index persistence on close and rebuild after a crash
//! - Merges through the store

use bytes::BytesMut;
use tempfile::TempDir;
use virtdb::error::{Result, VirtDbError};
use virtdb::files::{DiskKeyValueStore, MergeFilter};
use virtdb::serialization::{DataItemHeader, DataItemSerializer, InternalRecordSerializer, LeafRecordSerializer};
use virtdb::{Hash, InternalRecord, LeafRecord, HASH_SIZE};

const NAME: &str = "internal_hashes";

// =============================================================================
// Helper Functions
// =============================================================================

fn hash_of(n: u64) -> Hash {
    let mut bytes = [0u8; HASH_SIZE];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Hash::new(bytes)
}

fn open_store(dir: &std::path::Path) -> DiskKeyValueStore<InternalRecordSerializer> {
    DiskKeyValueStore::open(dir, NAME, InternalRecordSerializer, 16, 1_000, 1 << 20).unwrap()
}

fn setup_temp_store() -> (TempDir, DiskKeyValueStore<InternalRecordSerializer>) {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(temp_dir.path());
    (temp_dir, store)
}

fn records(paths: std::ops::Range<i64>, version: u64) -> Vec<InternalRecord> {
    paths
        .map(|p| InternalRecord::new(p, hash_of(p as u64 * 100 + version)))
        .collect()
}

/// Fails to serialize paths above 50
struct PickySerializer;

impl DataItemSerializer for PickySerializer {
    type Item = InternalRecord;

    fn data_version(&self) -> u64 {
        InternalRecordSerializer.data_version()
    }

    fn read_header(&self, data: &[u8]) -> Result<DataItemHeader> {
        InternalRecordSerializer.read_header(data)
    }

    fn serialize(&self, item: &InternalRecord, buf: &mut BytesMut) -> Result<()> {
        if item.path > 50 {
            return Err(VirtDbError::Serialization("path too large".to_string()));
        }
        InternalRecordSerializer.serialize(item, buf)
    }

    fn deserialize(&self, data: &[u8], data_version: u64) -> Result<InternalRecord> {
        InternalRecordSerializer.deserialize(data, data_version)
    }
}

// =============================================================================
// Write Tests
// =============================================================================

#[test]
fn test_store_put_visible_after_end_writing() {
    let (_temp, store) = setup_temp_store();

    store.start_writing().unwrap();
    store.put(&InternalRecord::new(3, hash_of(3))).unwrap();
    assert!(store.get(3).unwrap().is_none());

    store.end_writing(0, 10).unwrap();
    assert_eq!(store.get(3).unwrap(), Some(InternalRecord::new(3, hash_of(3))));
    assert_eq!(store.file_count(), 1);
}

#[test]
fn test_store_write_batch_overwrites() {
    let (_temp, store) = setup_temp_store();

    store.write_batch(&records(0..10, 1), 0, 20).unwrap();
    store.write_batch(&records(5..15, 2), 0, 20).unwrap();

    assert_eq!(store.get(4).unwrap().unwrap().hash, hash_of(401));
    assert_eq!(store.get(5).unwrap().unwrap().hash, hash_of(502));
    assert_eq!(store.get(14).unwrap().unwrap().hash, hash_of(1_402));
    assert!(store.get(15).unwrap().is_none());
    assert_eq!(store.file_count(), 2);
}

#[test]
fn test_store_failed_batch_publishes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = DiskKeyValueStore::open(temp_dir.path(), NAME, PickySerializer, 16, 1_000, 1 << 20).unwrap();
    store.write_batch(&records(0..5, 1), 0, 100).unwrap();

    let result = store.write_batch(&records(0..60, 2), 0, 100);

    assert!(matches!(result, Err(VirtDbError::Serialization(_))));
    assert_eq!(store.get(0).unwrap().unwrap().hash, hash_of(1));
    assert!(store.get(10).unwrap().is_none());
    assert_eq!(store.file_count(), 1);
    assert!(!store.collection().is_writing());

    // The store accepts new batches afterwards
    store.write_batch(&records(10..12, 3), 0, 100).unwrap();
    assert_eq!(store.get(10).unwrap().unwrap().hash, hash_of(1_003));
}

#[test]
fn test_store_prepared_batch_hidden_until_published() {
    let (_temp, store) = setup_temp_store();
    store.write_batch(&records(0..5, 1), 0, 4).unwrap();

    let batch = store.prepare_batch(&records(0..10, 2), 0, 9).unwrap();

    assert_eq!(store.get(0).unwrap().unwrap().hash, hash_of(1));
    assert!(store.get(7).unwrap().is_none());
    assert_eq!(store.valid_key_range().max_valid_key, 4);

    store.publish(batch).unwrap();

    assert_eq!(store.get(0).unwrap().unwrap().hash, hash_of(2));
    assert_eq!(store.get(7).unwrap().unwrap().hash, hash_of(702));
    assert_eq!(store.valid_key_range().max_valid_key, 9);
    assert_eq!(store.file_count(), 2);
}

#[test]
fn test_store_discarded_batch_leaves_no_file() {
    let (temp, store) = setup_temp_store();
    store.write_batch(&records(0..5, 1), 0, 4).unwrap();
    let entries_before = std::fs::read_dir(temp.path()).unwrap().count();

    let batch = store.prepare_batch(&records(0..10, 2), 0, 9).unwrap();
    store.discard(batch).unwrap();

    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), entries_before);
    assert_eq!(store.file_count(), 1);
    assert_eq!(store.get(0).unwrap().unwrap().hash, hash_of(1));
    assert!(store.get(7).unwrap().is_none());
    assert_eq!(store.valid_key_range().max_valid_key, 4);

    // Discarded data does not come back on reopen
    store.close().unwrap();
    let reopened = open_store(temp.path());
    assert_eq!(reopened.get(0).unwrap().unwrap().hash, hash_of(1));
    assert!(reopened.get(7).unwrap().is_none());
}

#[test]
fn test_store_for_each_live_respects_range() {
    let (_temp, store) = setup_temp_store();
    store.write_batch(&records(0..20, 1), 0, 9).unwrap();

    let mut seen = Vec::new();
    store
        .for_each_live(|record| {
            seen.push(record.path);
            Ok(())
        })
        .unwrap();

    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_store_index_saved_on_close_and_removed_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let index_file = temp_dir.path().join(format!("{}_index.ll", NAME));
    {
        let store = open_store(temp_dir.path());
        store.write_batch(&records(0..30, 1), 0, 29).unwrap();
        store.close().unwrap();
    }
    assert!(index_file.exists());

    let store = open_store(temp_dir.path());
    assert!(!index_file.exists());
    assert_eq!(store.get(17).unwrap().unwrap().hash, hash_of(1_701));
    assert_eq!(store.valid_key_range().max_valid_key, 29);
}

#[test]
fn test_store_rebuilds_index_after_crash() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open_store(temp_dir.path());
        store.write_batch(&records(0..10, 1), 0, 20).unwrap();
        store.write_batch(&records(5..20, 2), 0, 20).unwrap();
        // Dropped without close: no index file
    }

    let store = open_store(temp_dir.path());

    assert_eq!(store.get(4).unwrap().unwrap().hash, hash_of(401));
    assert_eq!(store.get(5).unwrap().unwrap().hash, hash_of(502));
    assert_eq!(store.get(19).unwrap().unwrap().hash, hash_of(1_902));
}

#[test]
fn test_store_leaf_records() {
    let temp_dir = TempDir::new().unwrap();
    let store: DiskKeyValueStore<LeafRecordSerializer<String, String>> =
        DiskKeyValueStore::open(temp_dir.path(), "leaves", LeafRecordSerializer::new(), 16, 100, 1 << 20).unwrap();

    let leaf = LeafRecord::new(9, hash_of(9), "k9".to_string(), "v9".to_string());
    store.write_batch([&leaf], 5, 9).unwrap();

    assert_eq!(store.get(9).unwrap(), Some(leaf));
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_store_merge_requires_min_files() {
    let (_temp, store) = setup_temp_store();
    store.write_batch(&records(0..5, 1), 0, 100).unwrap();
    store.write_batch(&records(0..5, 2), 0, 100).unwrap();

    assert!(store.merge(MergeFilter::All, 3).unwrap().is_none());
    assert_eq!(store.file_count(), 2);

    let stats = store.merge(MergeFilter::All, 2).unwrap().unwrap();
    assert_eq!(stats.files_merged, 2);
    assert_eq!(stats.items_copied, 5);
    assert_eq!(store.file_count(), 1);
    assert_eq!(store.get(3).unwrap().unwrap().hash, hash_of(302));
}

#[test]
fn test_store_merge_empty_is_none() {
    let (_temp, store) = setup_temp_store();

    assert!(store.merge(MergeFilter::All, 1).unwrap().is_none());
}

#[test]
fn test_store_snapshot_reopens_with_index() {
    let (_temp, store) = setup_temp_store();
    store.write_batch(&records(0..12, 1), 0, 11).unwrap();

    let snapshot_dir = TempDir::new().unwrap();
    store.snapshot(snapshot_dir.path()).unwrap();

    let copy = open_store(snapshot_dir.path());
    assert_eq!(copy.get(11).unwrap().unwrap().hash, hash_of(1_101));
    assert_eq!(copy.valid_key_range().max_valid_key, 11);
}
