//! Tests for HashList

use tempfile::TempDir;
use virtdb::collections::HashList;
use virtdb::error::VirtDbError;
use virtdb::{Hash, HASH_SIZE};

fn hash_of(n: u8) -> Hash {
    Hash::new([n; HASH_SIZE])
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_hash_list_put_get() {
    let list = HashList::new(4, 64);

    list.put(0, hash_of(1)).unwrap();
    list.put(13, hash_of(2)).unwrap();

    assert_eq!(list.get(0), Some(hash_of(1)));
    assert_eq!(list.get(13), Some(hash_of(2)));
    assert_eq!(list.get(12), None);
    assert_eq!(list.get(64), None);
    assert_eq!(list.size(), 14);
}

#[test]
fn test_hash_list_overwrite() {
    let list = HashList::new(4, 8);

    list.put(5, hash_of(1)).unwrap();
    list.put(5, hash_of(9)).unwrap();

    assert_eq!(list.get(5), Some(hash_of(9)));
}

#[test]
fn test_hash_list_rejects_index_beyond_capacity() {
    let list = HashList::new(4, 8);

    let result = list.put(8, hash_of(1));

    assert!(matches!(result, Err(VirtDbError::IllegalArgument(_))));
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_hash_list_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("hashes.hl");

    let list = HashList::new(4, 100);
    for i in (0..40u8).step_by(3) {
        list.put(i as u64, hash_of(i)).unwrap();
    }
    list.write_to_file(&path).unwrap();

    let loaded = HashList::load_from_file(&path).unwrap();
    assert_eq!(loaded.capacity(), 100);
    assert_eq!(loaded.size(), list.size());
    for i in 0..40u64 {
        assert_eq!(loaded.get(i), list.get(i), "index {}", i);
    }
}

#[test]
fn test_hash_list_load_rejects_bad_marker() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.hl");

    let list = HashList::new(4, 10);
    list.put(0, hash_of(1)).unwrap();
    list.write_to_file(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[24] = 7;
    std::fs::write(&path, bytes).unwrap();

    let result = HashList::load_from_file(&path);
    assert!(matches!(result, Err(VirtDbError::Corruption(_))));
}
