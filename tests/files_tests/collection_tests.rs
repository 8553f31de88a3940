//! Tests for DataFileCollection
//!
//! These tests verify:
//! - Write sessions, sealing and reads by location
//! - Discarding of files that were never sealed
//! - Replay order
//! - Merging: liveness, key range filtering, roll-over, source retirement
//! - Checksum failures surface as corruption
//! - Snapshots

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use tempfile::TempDir;
use virtdb::collections::LongList;
use virtdb::error::VirtDbError;
use virtdb::files::{DataFileCollection, DataFileReader, MergeFilter, NON_EXISTENT_DATA_LOCATION};
use virtdb::serialization::InternalRecordSerializer;
use virtdb::{Hash, InternalRecord, HASH_SIZE};

const STORE: &str = "internal";

// =============================================================================
// Helper Functions
// =============================================================================

fn hash_of(n: u64) -> Hash {
    let mut bytes = [0u8; HASH_SIZE];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Hash::new(bytes)
}

fn setup_temp_collection() -> (TempDir, DataFileCollection<InternalRecordSerializer>) {
    let temp_dir = TempDir::new().unwrap();
    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
    (temp_dir, collection)
}

/// Write one file holding `paths`, each hashed with `version`, and point the
/// index at the new locations
fn write_file(
    collection: &DataFileCollection<InternalRecordSerializer>,
    index: &LongList,
    paths: impl IntoIterator<Item = u64>,
    version: u64,
) -> Arc<DataFileReader> {
    collection.start_writing().unwrap();
    let mut locations = Vec::new();
    for path in paths {
        let record = InternalRecord::new(path as i64, hash_of(path * 1_000 + version));
        locations.push(collection.store_data_item(&record).unwrap());
    }
    let reader = collection.end_writing(0, 1_000).unwrap().unwrap();
    for (key, location) in locations {
        index.put(key, location).unwrap();
    }
    reader.mark_available_for_merge();
    reader
}

fn read(
    collection: &DataFileCollection<InternalRecordSerializer>,
    index: &LongList,
    path: u64,
) -> Option<Hash> {
    collection
        .read_using_index(index, path)
        .unwrap()
        .map(|record| record.hash)
}

// =============================================================================
// Write Session Tests
// =============================================================================

#[test]
fn test_collection_write_and_read_by_location() {
    let (temp_dir, collection) = setup_temp_collection();

    collection.start_writing().unwrap();
    let (key, location) = collection
        .store_data_item(&InternalRecord::new(7, hash_of(7)))
        .unwrap();
    collection.end_writing(0, 100).unwrap();

    assert_eq!(key, 7);
    assert_ne!(location, NON_EXISTENT_DATA_LOCATION);
    let record = collection.read_data_item(location).unwrap().unwrap();
    assert_eq!(record, InternalRecord::new(7, hash_of(7)));

    assert!(temp_dir.path().join("internal_000000.vdf").exists());
    assert_eq!(collection.file_count(), 1);
}

#[test]
fn test_collection_read_absent_location() {
    let (_temp, collection) = setup_temp_collection();

    assert!(collection.read_data_item(NON_EXISTENT_DATA_LOCATION).unwrap().is_none());
}

#[test]
fn test_collection_store_without_session_fails() {
    let (_temp, collection) = setup_temp_collection();

    let result = collection.store_data_item(&InternalRecord::new(1, hash_of(1)));

    assert!(matches!(result, Err(VirtDbError::IllegalState(_))));
}

#[test]
fn test_collection_double_start_fails() {
    let (_temp, collection) = setup_temp_collection();

    collection.start_writing().unwrap();
    let result = collection.start_writing();

    assert!(matches!(result, Err(VirtDbError::IllegalState(_))));
}

#[test]
fn test_collection_empty_session_leaves_no_file() {
    let (temp_dir, collection) = setup_temp_collection();

    collection.start_writing().unwrap();
    let sealed = collection.end_writing(0, 10).unwrap();

    assert!(sealed.is_none());
    assert_eq!(collection.file_count(), 0);
    assert!(!temp_dir.path().join("internal_000000.vdf").exists());
}

#[test]
fn test_collection_abort_removes_file() {
    let (temp_dir, collection) = setup_temp_collection();

    collection.start_writing().unwrap();
    collection
        .store_data_item(&InternalRecord::new(1, hash_of(1)))
        .unwrap();
    collection.abort_writing();

    assert!(!collection.is_writing());
    assert!(!temp_dir.path().join("internal_000000.vdf").exists());
}

#[test]
fn test_collection_sealed_file_not_mergeable_until_marked() {
    let (_temp, collection) = setup_temp_collection();

    collection.start_writing().unwrap();
    collection
        .store_data_item(&InternalRecord::new(1, hash_of(1)))
        .unwrap();
    let reader = collection.end_writing(0, 10).unwrap().unwrap();

    assert!(collection.files_for_merge(MergeFilter::All).is_empty());
    reader.mark_available_for_merge();
    assert_eq!(collection.files_for_merge(MergeFilter::All).len(), 1);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_collection_discards_incomplete_file_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let index = LongList::new(64, 1_024);
    {
        let collection =
            DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
        write_file(&collection, &index, 0..5, 1);

        // Crash in the middle of the second session
        collection.start_writing().unwrap();
        collection
            .store_data_item(&InternalRecord::new(9, hash_of(9)))
            .unwrap();
    }

    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();

    assert_eq!(collection.file_count(), 1);
    assert!(!temp_dir.path().join("internal_000001.vdf").exists());

    // File numbering continues after the discarded file
    collection.start_writing().unwrap();
    collection
        .store_data_item(&InternalRecord::new(1, hash_of(1)))
        .unwrap();
    let reader = collection.end_writing(0, 10).unwrap().unwrap();
    assert_eq!(reader.index(), 2);
}

#[test]
fn test_collection_discards_truncated_header() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("internal_000003.vdf"), b"VDBF").unwrap();

    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();

    assert_eq!(collection.file_count(), 0);
    assert!(!temp_dir.path().join("internal_000003.vdf").exists());
}

#[test]
fn test_collection_ignores_other_stores_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("leaves_000000.vdf"), b"not ours").unwrap();
    fs::write(temp_dir.path().join("internal.txt"), b"not ours").unwrap();

    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();

    assert_eq!(collection.file_count(), 0);
    assert!(temp_dir.path().join("leaves_000000.vdf").exists());
}

#[test]
fn test_collection_replay_is_oldest_first() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, [1, 2], 1);
    write_file(&collection, &index, [2, 3], 2);

    let rebuilt = LongList::new(64, 1_024);
    collection
        .replay(|key, location| rebuilt.put(key, location))
        .unwrap();

    for path in 1..=3 {
        assert_eq!(rebuilt.get(path, 0), index.get(path, 0), "path {}", path);
    }
    assert_eq!(read(&collection, &rebuilt, 2), Some(hash_of(2_002)));
}

#[test]
fn test_collection_valid_key_range_persists() {
    let temp_dir = TempDir::new().unwrap();
    {
        let collection =
            DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
        collection.set_valid_key_range(3, 17);
        collection.close().unwrap();
    }

    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
    let range = collection.valid_key_range();

    assert_eq!((range.min_valid_key, range.max_valid_key), (3, 17));
}

#[test]
fn test_collection_checksum_mismatch_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let index = LongList::new(64, 1_024);
    {
        let collection =
            DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
        write_file(&collection, &index, [4], 1);
    }

    // Flip the last byte of the only item
    let path = temp_dir.path().join("internal_000000.vdf");
    let len = fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    file.write_all(&[0xAA]).unwrap();
    drop(file);

    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1 << 20).unwrap();
    let result = collection.read_data_item(index.get(4, 0));

    assert!(matches!(result, Err(VirtDbError::Corruption(_))));
}

#[test]
fn test_collection_concurrent_reads_of_one_file() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..500, 3);

    std::thread::scope(|scope| {
        for t in 0..8u64 {
            let collection = &collection;
            let index = &index;
            scope.spawn(move || {
                for round in 0..20u64 {
                    for path in (0..500u64).rev().skip(((t + round) % 7) as usize).step_by(3) {
                        assert_eq!(read(collection, index, path), Some(hash_of(path * 1_000 + 3)));
                    }
                }
            });
        }
    });
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_collection_merge_keeps_only_live_items() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    let a = write_file(&collection, &index, 0..10, 1);
    let b = write_file(&collection, &index, 5..15, 2);
    let c = write_file(&collection, &index, [0], 3);

    let sources = collection.files_for_merge(MergeFilter::All);
    assert_eq!(sources.len(), 3);
    let stats = collection.merge(&index, &sources).unwrap();

    assert_eq!(stats.files_merged, 3);
    assert_eq!(stats.files_created, 1);
    assert_eq!(stats.items_copied, 15);
    assert_eq!(stats.items_relocated, 15);
    assert_eq!(collection.file_count(), 1);
    for reader in [&a, &b, &c] {
        assert!(reader.is_deleted());
        assert!(!reader.path().exists());
    }

    assert_eq!(read(&collection, &index, 0), Some(hash_of(3)));
    assert_eq!(read(&collection, &index, 4), Some(hash_of(4_001)));
    assert_eq!(read(&collection, &index, 5), Some(hash_of(5_002)));
    assert_eq!(read(&collection, &index, 14), Some(hash_of(14_002)));
    assert_eq!(read(&collection, &index, 15), None);
}

#[test]
fn test_collection_merge_output_is_mergeable_and_sorted_first() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..3, 1);
    write_file(&collection, &index, 3..6, 1);

    let sources = collection.files_for_merge(MergeFilter::All);
    collection.merge(&index, &sources).unwrap();
    let newer = write_file(&collection, &index, [1], 2);

    let files = collection.sorted_files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].index(), newer.index());
    assert!(files[0].is_available_for_merge());

    // Replay must let the newer file win
    let rebuilt = LongList::new(64, 1_024);
    collection.replay(|k, l| rebuilt.put(k, l)).unwrap();
    assert_eq!(read(&collection, &rebuilt, 1), Some(hash_of(1_002)));
}

#[test]
fn test_collection_merge_drops_keys_outside_range() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..10, 1);
    write_file(&collection, &index, 10..20, 1);

    collection.set_valid_key_range(0, 9);
    let sources = collection.files_for_merge(MergeFilter::All);
    let stats = collection.merge(&index, &sources).unwrap();

    assert_eq!(stats.items_copied, 10);
    assert_eq!(index.get(15, NON_EXISTENT_DATA_LOCATION), NON_EXISTENT_DATA_LOCATION);
    assert_eq!(read(&collection, &index, 9), Some(hash_of(9_001)));
}

#[test]
fn test_collection_merge_rolls_over_output_files() {
    let temp_dir = TempDir::new().unwrap();
    let collection =
        DataFileCollection::open(temp_dir.path(), STORE, InternalRecordSerializer, 1_024).unwrap();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..50, 1);
    write_file(&collection, &index, 50..100, 1);

    let sources = collection.files_for_merge(MergeFilter::All);
    let stats = collection.merge(&index, &sources).unwrap();

    assert!(stats.files_created > 1);
    assert_eq!(stats.items_copied, 100);
    for path in 0..100 {
        assert_eq!(read(&collection, &index, path), Some(hash_of(path * 1_000 + 1)));
    }
}

#[test]
fn test_collection_merge_skips_stale_index_entries() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..4, 1);
    let sources = collection.files_for_merge(MergeFilter::All);

    // A newer batch lands after the merge picked its sources
    write_file(&collection, &index, [2], 2);
    let stats = collection.merge(&index, &sources).unwrap();

    assert_eq!(stats.items_copied, 3);
    assert_eq!(read(&collection, &index, 2), Some(hash_of(2_002)));
    assert_eq!(read(&collection, &index, 3), Some(hash_of(3_001)));
}

// =============================================================================
// Merge Filter Tests
// =============================================================================

#[test]
fn test_merge_filter_takes_newest_small_run() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    let big = write_file(&collection, &index, 0..100, 1);
    let small_a = write_file(&collection, &index, [200], 1);
    let small_b = write_file(&collection, &index, [201], 1);

    let cutoff = big.size();
    let selected = collection.files_for_merge(MergeFilter::NewestSmallerThan {
        cutoff_bytes: cutoff,
        max_files: 10,
    });
    let indices: Vec<_> = selected.iter().map(|f| f.index()).collect();
    assert_eq!(indices, vec![small_a.index(), small_b.index()]);

    let capped = collection.files_for_merge(MergeFilter::NewestSmallerThan {
        cutoff_bytes: cutoff,
        max_files: 1,
    });
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].index(), small_b.index());
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_collection_snapshot_is_openable() {
    let (_temp, collection) = setup_temp_collection();
    let index = LongList::new(64, 1_024);
    write_file(&collection, &index, 0..8, 1);
    collection.set_valid_key_range(0, 7);

    let snapshot_dir = TempDir::new().unwrap();
    let target = snapshot_dir.path().join("snap");
    collection.snapshot(&target).unwrap();

    let copy = DataFileCollection::open(&target, STORE, InternalRecordSerializer, 1 << 20).unwrap();
    assert_eq!(copy.file_count(), 1);
    assert_eq!(copy.valid_key_range().max_valid_key, 7);
    assert_eq!(read(&copy, &index, 3), Some(hash_of(3_001)));
}
