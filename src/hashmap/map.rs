//! Half-Disk Hash Map
//!
//! `key -> path` for arbitrary serializable keys. The bucket directory
//! (bucket index → data location) is an in-memory long list; bucket contents
//! live in append-only data files.
//!
//! ```text
//!   key ──serialize──► bytes ──crc32──► hash ──& (n-1)──► bucket index
//!                                                              │
//!                                   bucket directory (LongList)│
//!                                                              ▼
//!                                              data file: [entries...]
//! ```
//!
//! Writes are staged per bucket between `start_writing` and `end_writing`;
//! `end_writing` rewrites every touched bucket into one new file.

use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, VirtDbError};
use crate::files::{DiskKeyValueStore, MergeFilter, MergeStats, PendingBatch};
use crate::serialization::{to_bytes, VirtualKey};

use super::bucket::{Bucket, BucketSerializer};

/// Target average number of entries per bucket
pub const GOOD_AVERAGE_BUCKET_ENTRY_COUNT: u64 = 32;

#[derive(Debug, Serialize, Deserialize)]
struct HashMapMetadata {
    num_buckets: u32,
}

#[derive(Debug)]
enum Mutation {
    Put { hash_code: u32, key: Bytes, value: i64 },
    Delete { hash_code: u32, key: Bytes },
}

/// Number of buckets for a map expected to hold `max_keys` keys: twice the
/// highest power of two in `max_keys / 32`, at least 2
pub fn bucket_count_for(max_keys: u64) -> u32 {
    let per_bucket = max_keys / GOOD_AVERAGE_BUCKET_ENTRY_COUNT;
    let highest_one_bit = if per_bucket == 0 {
        0
    } else {
        1u64 << (63 - per_bucket.leading_zeros())
    };
    highest_one_bit.saturating_mul(2).clamp(2, 1 << 31) as u32
}

/// Disk-backed hash map from keys to paths
pub struct HalfDiskHashMap<K> {
    name: String,
    metadata_path: PathBuf,
    num_buckets: u32,
    store: DiskKeyValueStore<BucketSerializer>,
    pending: Mutex<Option<BTreeMap<u32, Vec<Mutation>>>>,
    _marker: PhantomData<fn() -> K>,
}

impl<K: VirtualKey> HalfDiskHashMap<K> {
    /// Open or create the map `name` in `dir`.
    ///
    /// The bucket count is fixed when the map is created; a reopened map keeps
    /// the count from its metadata file.
    pub fn open(
        dir: &Path,
        name: &str,
        max_keys: u64,
        longs_per_chunk: usize,
        max_data_file_bytes: u64,
    ) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let metadata_path = dir.join(format!("{}_metadata.hdhm", name));

        let num_buckets = if metadata_path.exists() {
            let metadata: HashMapMetadata = bincode::deserialize(&fs::read(&metadata_path)?)?;
            if !metadata.num_buckets.is_power_of_two() {
                return Err(VirtDbError::Corruption(format!(
                    "{}: bucket count {} is not a power of two",
                    name, metadata.num_buckets
                )));
            }
            metadata.num_buckets
        } else {
            let num_buckets = bucket_count_for(max_keys);
            fs::write(
                &metadata_path,
                bincode::serialize(&HashMapMetadata { num_buckets })?,
            )?;
            num_buckets
        };

        let store = DiskKeyValueStore::open(
            dir,
            name,
            BucketSerializer,
            longs_per_chunk,
            num_buckets as u64,
            max_data_file_bytes,
        )?;
        store.set_valid_key_range(0, num_buckets as i64 - 1);

        info!(map = %name, buckets = num_buckets, "Opened half-disk hash map");

        Ok(Self {
            name: name.to_string(),
            metadata_path,
            num_buckets,
            store,
            pending: Mutex::new(None),
            _marker: PhantomData,
        })
    }

    /// Path for `key`, or `default` when the key is absent
    pub fn get(&self, key: &K, default: i64) -> Result<i64> {
        let key_bytes = to_bytes(key);
        let hash_code = crc32fast::hash(&key_bytes);
        let bucket = self.store.get(self.bucket_index(hash_code) as u64)?;
        Ok(bucket
            .and_then(|b| b.find(hash_code, &key_bytes))
            .unwrap_or(default))
    }

    // =========================================================================
    // Writing
    // =========================================================================

    pub fn start_writing(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(VirtDbError::IllegalState(format!(
                "{}: a write session is already open",
                self.name
            )));
        }
        *pending = Some(BTreeMap::new());
        Ok(())
    }

    pub fn put(&self, key: &K, value: i64) -> Result<()> {
        let key = Bytes::from(to_bytes(key));
        let hash_code = crc32fast::hash(&key);
        self.stage(hash_code, Mutation::Put {
            hash_code,
            key,
            value,
        })
    }

    pub fn delete(&self, key: &K) -> Result<()> {
        let key = Bytes::from(to_bytes(key));
        let hash_code = crc32fast::hash(&key);
        self.stage(hash_code, Mutation::Delete { hash_code, key })
    }

    /// Apply the staged mutations: every touched bucket is read, updated in
    /// call order and written to a new data file. Buckets left empty are still
    /// written so the deletion is durable.
    pub fn end_writing(&self) -> Result<()> {
        let batch = self.prepare_writing()?;
        self.store.publish(batch)
    }

    /// `end_writing` without publishing: the rewritten buckets are sealed in
    /// a file that `publish` makes visible or `discard` deletes
    pub fn prepare_writing(&self) -> Result<PendingBatch> {
        let staged = self.pending.lock().take().ok_or_else(|| {
            VirtDbError::IllegalState(format!("{}: no write session is open", self.name))
        })?;
        let max_bucket = self.num_buckets as i64 - 1;
        if staged.is_empty() {
            return Ok(PendingBatch::range_only(0, max_bucket));
        }

        self.store.start_writing()?;
        if let Err(e) = self.write_buckets(&staged) {
            self.store.abort_writing();
            return Err(e);
        }
        let batch = self.store.seal_writing(0, max_bucket)?;

        debug!(map = %self.name, buckets = staged.len(), "Wrote hash map buckets");
        Ok(batch)
    }

    pub fn publish(&self, batch: PendingBatch) -> Result<()> {
        self.store.publish(batch)
    }

    pub fn discard(&self, batch: PendingBatch) -> Result<()> {
        self.store.discard(batch)
    }

    /// Drop the staged mutations of the open session, if any
    pub fn abort_writing(&self) {
        self.pending.lock().take();
    }

    fn write_buckets(&self, staged: &BTreeMap<u32, Vec<Mutation>>) -> Result<()> {
        for (bucket_index, mutations) in staged {
            let mut bucket = self
                .store
                .get(*bucket_index as u64)?
                .unwrap_or_else(|| Bucket::new(*bucket_index));
            for mutation in mutations {
                match mutation {
                    Mutation::Put {
                        hash_code,
                        key,
                        value,
                    } => bucket.put(*hash_code, key.clone(), *value),
                    Mutation::Delete { hash_code, key } => {
                        bucket.remove(*hash_code, key);
                    }
                }
            }
            self.store.put(&bucket)?;
        }
        Ok(())
    }

    // =========================================================================
    // Merging & Lifecycle
    // =========================================================================

    pub fn merge(&self, filter: MergeFilter, min_files: usize) -> Result<Option<MergeStats>> {
        self.store.merge(filter, min_files)
    }

    pub fn close(&self) -> Result<()> {
        if self.pending.lock().is_some() {
            self.end_writing()?;
        }
        self.store.close()
    }

    pub fn snapshot(&self, dir: &Path) -> Result<()> {
        self.store.snapshot(dir)?;
        if let Some(name) = self.metadata_path.file_name() {
            fs::copy(&self.metadata_path, dir.join(name))?;
        }
        Ok(())
    }

    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    pub fn file_count(&self) -> usize {
        self.store.file_count()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.store.total_size_bytes()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn bucket_index(&self, hash_code: u32) -> u32 {
        hash_code & (self.num_buckets - 1)
    }

    fn stage(&self, hash_code: u32, mutation: Mutation) -> Result<()> {
        let bucket_index = self.bucket_index(hash_code);
        let mut pending = self.pending.lock();
        let staged = pending.as_mut().ok_or_else(|| {
            VirtDbError::IllegalState(format!("{}: no write session is open", self.name))
        })?;
        staged.entry(bucket_index).or_default().push(mutation);
        Ok(())
    }
}
