//! Virtual Data Source
//!
//! The façade the Merkle layer talks to. One `save_records` call persists a
//! whole round of the tree; loads resolve keys and paths through the indices.
//!
//! ## save_records fan-out
//! ```text
//!                    save_records(first, last, internal, leaves)
//!                                      │
//!                         validate (no I/O on failure)
//!                                      │
//!          ┌───────────────────────────┼───────────────────────────┐
//!          ▼                           ▼                           ▼
//!   [worker] hash store        [worker] path → leaf         [caller] key → path
//!          └───────────────────────────┼───────────────────────────┘
//!                                      ▼
//!              all sealed: publish every part, then metadata
//!              any failed: discard every part, first error wins
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::thread::ScopedJoinHandle;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collections::LongList;
use crate::config::Config;
use crate::error::{Result, VirtDbError};
use crate::files::{DiskKeyValueStore, MergeStats, PendingBatch};
use crate::hash::Hash;
use crate::hash_store::{HashStore, PendingHashes};
use crate::hashmap::HalfDiskHashMap;
use crate::merge::{Compactable, MergeKind, MergeScheduler};
use crate::records::{InternalRecord, KeyRange, LeafRecord, INVALID_PATH};
use crate::serialization::{
    is_long_key_type, long_key_of, size_violation, LeafRecordSerializer, VirtualKey, VirtualValue,
};

use super::metadata::DataSourceMetadata;
use super::paths::{validate_internal_records, validate_leaf_path_range, validate_leaf_paths};

// =============================================================================
// Statistics
// =============================================================================

/// File count and size of one store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub files: usize,
    pub bytes: u64,
}

/// File counts and sizes of every store in a data source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSourceStats {
    pub internal_hashes: StoreStats,
    pub leaves: StoreStats,
    /// Empty in long key mode, where the index lives in memory only
    pub key_to_path: StoreStats,
}

impl DataSourceStats {
    pub fn total_files(&self) -> usize {
        self.internal_hashes.files + self.leaves.files + self.key_to_path.files
    }

    pub fn total_bytes(&self) -> u64 {
        self.internal_hashes.bytes + self.leaves.bytes + self.key_to_path.bytes
    }
}

// =============================================================================
// Key Index
// =============================================================================

/// `key -> path`, chosen by the key type
enum KeyIndex<K> {
    /// Keys of exactly 8 bytes: slot `long key` holds `path + 1`
    Long { list: LongList, file: PathBuf },
    Hashed(HalfDiskHashMap<K>),
}

/// Long keys `0..LONG_KEY_INDEX_CAPACITY` are indexable, whatever
/// `max_num_of_keys` says; chunks are only allocated for keys in use
pub const LONG_KEY_INDEX_CAPACITY: u64 = 4_000_000_000;

/// Chunk directory size of the long key index
const LONG_KEY_INDEX_MAX_CHUNKS: u64 = 1 << 16;

/// Key index changes of one round, applied after every writer succeeded
enum PendingKeys {
    /// `(long key, path + 1)` in order; `None` removes the key
    Long(Vec<(u64, Option<u64>)>),
    Hashed(PendingBatch),
    Unchanged,
}

/// What the three writers of one `save_records` call produced
struct PreparedRound {
    hashes: Result<PendingHashes>,
    leaves: Result<PendingBatch>,
    keys: Result<PendingKeys>,
}

fn encode_path(path: i64) -> u64 {
    path as u64 + 1
}

fn decode_path(value: u64) -> i64 {
    value as i64 - 1
}

// =============================================================================
// Shared State
// =============================================================================

/// Everything the merge thread shares with the public handle
struct Inner<K: VirtualKey, V: VirtualValue> {
    config: Config,
    dir: PathBuf,
    threshold: i64,
    hash_store: HashStore,
    leaves: DiskKeyValueStore<LeafRecordSerializer<K, V>>,
    key_index: KeyIndex<K>,
    leaf_range: RwLock<KeyRange>,
    /// Held by merges and snapshots, never by readers or the writer
    merge_lock: Mutex<()>,
    closed: AtomicBool,
}

/// A virtual data source over keys `K` and values `V`
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (`save_records*`, `snapshot`, `close`): the caller must not
///   overlap them; this is not checked
/// - **Reads** (`load_*`, `find_key`): any number of threads, concurrently
///   with the writer and with a background merge
/// - **Merges**: one at a time, serialized by `merge_lock`
pub struct VirtualDataSource<K: VirtualKey, V: VirtualValue> {
    inner: Arc<Inner<K, V>>,
    scheduler: Mutex<Option<MergeScheduler>>,
}

impl<K: VirtualKey, V: VirtualValue> VirtualDataSource<K, V> {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const LEAVES_NAME: &'static str = "leaves";
    const KEY_TO_PATH_NAME: &'static str = "key_to_path";
    const LONG_KEY_INDEX_FILE: &'static str = "long_key_to_path.ll";

    /// Open or create a data source with the given config
    ///
    /// On startup:
    /// 1. Load the metadata, or create it for an empty directory
    /// 2. Open the hash store and the leaf store
    /// 3. Load or rebuild the key index
    /// 4. Start the merge thread if merging is enabled
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();
        fs::create_dir_all(&dir)?;

        // Step 1: Metadata
        let long_key_mode = is_long_key_type::<K>();
        let metadata = match DataSourceMetadata::load(&dir)? {
            Some(metadata) => {
                if metadata.long_key_mode != long_key_mode {
                    return Err(VirtDbError::IllegalArgument(format!(
                        "{} was created with long_key_mode={}, key type has long_key_mode={}",
                        dir.display(),
                        metadata.long_key_mode,
                        long_key_mode
                    )));
                }
                if metadata.internal_hashes_ram_to_disk_threshold
                    != config.internal_hashes_ram_to_disk_threshold
                {
                    warn!(
                        label = %config.label,
                        stored = metadata.internal_hashes_ram_to_disk_threshold,
                        configured = config.internal_hashes_ram_to_disk_threshold,
                        "Ignoring configured RAM/disk threshold, keeping the one fixed at creation"
                    );
                }
                metadata
            }
            None => {
                if fs::read_dir(&dir)?.next().is_some() {
                    return Err(VirtDbError::Corruption(format!(
                        "{} is not empty but has no data source metadata",
                        dir.display()
                    )));
                }
                DataSourceMetadata::new(config.internal_hashes_ram_to_disk_threshold, long_key_mode)
            }
        };
        let threshold = metadata.internal_hashes_ram_to_disk_threshold;
        let leaf_range = KeyRange::new(metadata.first_leaf_path, metadata.last_leaf_path);

        // Step 2: Stores
        let hash_store = HashStore::open(&dir, threshold, &config)?;
        hash_store.set_first_leaf_path(metadata.first_leaf_path);

        let leaves = DiskKeyValueStore::open(
            &dir.join(Self::LEAVES_NAME),
            Self::LEAVES_NAME,
            LeafRecordSerializer::new(),
            config.longs_per_chunk,
            config.max_num_of_paths(),
            config.max_data_file_bytes,
        )?;
        leaves.set_valid_key_range(metadata.first_leaf_path, metadata.last_leaf_path);

        // Step 3: Key index
        let key_index = if long_key_mode {
            let file = dir.join(Self::LONG_KEY_INDEX_FILE);
            let list = Self::open_long_key_index(&file, &config, &leaves)?;
            KeyIndex::Long { list, file }
        } else {
            KeyIndex::Hashed(HalfDiskHashMap::open(
                &dir.join(Self::KEY_TO_PATH_NAME),
                Self::KEY_TO_PATH_NAME,
                config.max_num_of_keys,
                config.longs_per_chunk,
                config.max_data_file_bytes,
            )?)
        };

        metadata.write(&dir)?;

        info!(
            label = %config.label,
            dir = %dir.display(),
            first_leaf_path = metadata.first_leaf_path,
            last_leaf_path = metadata.last_leaf_path,
            long_key_mode,
            threshold,
            "Opened virtual data source"
        );

        let merging_enabled = config.merging_enabled;
        let source = Self {
            inner: Arc::new(Inner {
                config,
                dir,
                threshold,
                hash_store,
                leaves,
                key_index,
                leaf_range: RwLock::new(leaf_range),
                merge_lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
            scheduler: Mutex::new(None),
        };

        // Step 4: Background merging
        if merging_enabled {
            source.start_background_compaction()?;
        }
        Ok(source)
    }

    /// Load the saved long key index, or rebuild it from the live leaves
    fn open_long_key_index(
        file: &Path,
        config: &Config,
        leaves: &DiskKeyValueStore<LeafRecordSerializer<K, V>>,
    ) -> Result<LongList> {
        if file.exists() {
            let list = LongList::load_from_file(file)?;
            fs::remove_file(file)?;
            return Ok(list);
        }
        let longs_per_chunk = (config.longs_per_chunk as u64)
            .max(LONG_KEY_INDEX_CAPACITY.div_ceil(LONG_KEY_INDEX_MAX_CHUNKS));
        let list = LongList::new(longs_per_chunk as usize, LONG_KEY_INDEX_CAPACITY);
        if leaves.file_count() > 0 {
            leaves.for_each_live(|record| {
                if let Some(long_key) = long_key_of(&record.key) {
                    list.put(long_key, encode_path(record.path))?;
                }
                Ok(())
            })?;
            info!(label = %config.label, keys = list.size(), "Rebuilt long key index from leaves");
        }
        Ok(list)
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Persist one round of the tree.
    ///
    /// `internal_records` must be sorted by path and below `first_leaf_path`;
    /// `leaf_records` must have unique paths within
    /// `[first_leaf_path, last_leaf_path]`.
    /// Empty slices are no-ops for their category. When this returns `Ok`,
    /// the batch is durable and visible; on `Err` it must be treated as not
    /// committed.
    pub fn save_records(
        &self,
        first_leaf_path: i64,
        last_leaf_path: i64,
        internal_records: &[InternalRecord],
        leaf_records: &[LeafRecord<K, V>],
    ) -> Result<()> {
        self.save_records_with_deletions(
            first_leaf_path,
            last_leaf_path,
            internal_records,
            leaf_records,
            &[],
        )
    }

    /// `save_records` that also removes the `key -> path` mappings of
    /// `deleted_keys`. Deletions are applied after the batch's leaves, so a
    /// key both saved and deleted ends up deleted.
    ///
    /// Every writer seals its output without publishing it. Only when all
    /// three succeed are index entries, key ranges and RAM hashes published;
    /// otherwise the sealed files are deleted and the previous round stays
    /// visible.
    pub fn save_records_with_deletions(
        &self,
        first_leaf_path: i64,
        last_leaf_path: i64,
        internal_records: &[InternalRecord],
        leaf_records: &[LeafRecord<K, V>],
        deleted_keys: &[K],
    ) -> Result<()> {
        let inner = &*self.inner;
        inner.ensure_open()?;
        inner.validate_batch(first_leaf_path, last_leaf_path, internal_records, leaf_records)?;

        let started = Instant::now();
        let round = crossbeam::thread::scope(|scope| {
            let hashes = scope
                .builder()
                .name(format!("{}-hashes", inner.config.label))
                .spawn(|_| inner.hash_store.prepare(first_leaf_path, internal_records))
                .map_err(VirtDbError::from);
            let leaves = scope
                .builder()
                .name(format!("{}-leaves", inner.config.label))
                .spawn(|_| inner.prepare_leaves(first_leaf_path, last_leaf_path, leaf_records))
                .map_err(VirtDbError::from);

            let keys = inner.prepare_key_index(leaf_records, deleted_keys);
            PreparedRound {
                hashes: hashes.and_then(|h| join_worker(h, "internal hash writer")),
                leaves: leaves.and_then(|h| join_worker(h, "leaf writer")),
                keys,
            }
        })
        .map_err(|_| VirtDbError::WorkerPanicked("save_records worker".to_string()))?;

        inner.finish_round(round, KeyRange::new(first_leaf_path, last_leaf_path))?;
        inner.current_metadata().write(&inner.dir)?;

        debug!(
            label = %inner.config.label,
            first_leaf_path,
            last_leaf_path,
            internal = internal_records.len(),
            leaves = leaf_records.len(),
            deleted = deleted_keys.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Saved records"
        );
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Leaf record for `key`, `None` if the key is not in the tree
    pub fn load_leaf_record_by_key(&self, key: &K) -> Result<Option<LeafRecord<K, V>>> {
        let path = self.find_key(key)?;
        if path == INVALID_PATH {
            return Ok(None);
        }
        let Some(record) = self.inner.leaves.get(path as u64)? else {
            return Ok(None);
        };
        if record.key != *key {
            warn!(
                label = %self.inner.config.label,
                path,
                ?key,
                found = ?record.key,
                "Key index points at a leaf holding a different key"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Leaf record at `path`, `None` outside the leaf range
    pub fn load_leaf_record(&self, path: i64) -> Result<Option<LeafRecord<K, V>>> {
        check_path(path)?;
        self.inner.ensure_open()?;
        if !self.inner.leaf_range.read().within_range(path) {
            return Ok(None);
        }
        self.inner.leaves.get(path as u64)
    }

    pub fn load_leaf_hash(&self, path: i64) -> Result<Option<Hash>> {
        Ok(self.load_leaf_record(path)?.map(|record| record.hash))
    }

    /// Internal record at `path`, `None` for leaf paths and unknown paths
    pub fn load_internal_record(&self, path: i64) -> Result<Option<InternalRecord>> {
        Ok(self
            .load_internal_hash(path)?
            .map(|hash| InternalRecord::new(path, hash)))
    }

    pub fn load_internal_hash(&self, path: i64) -> Result<Option<Hash>> {
        check_path(path)?;
        self.inner.ensure_open()?;
        if path >= self.inner.leaf_range.read().min_valid_key {
            return Ok(None);
        }
        self.inner.hash_store.get(path)
    }

    /// Current path of `key`, or `INVALID_PATH`
    pub fn find_key(&self, key: &K) -> Result<i64> {
        self.inner.ensure_open()?;
        let path = match &self.inner.key_index {
            KeyIndex::Long { list, .. } => match long_key_of(key) {
                Some(long_key) => decode_path(list.get(long_key, 0)),
                None => INVALID_PATH,
            },
            KeyIndex::Hashed(map) => map.get(key, INVALID_PATH)?,
        };
        if path == INVALID_PATH || !self.inner.leaf_range.read().within_range(path) {
            return Ok(INVALID_PATH);
        }
        Ok(path)
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Run one merge of the given tier now, on the calling thread
    pub fn merge(&self, kind: MergeKind) -> Result<MergeStats> {
        self.inner.ensure_open()?;
        self.inner.compact(kind)
    }

    /// Start the merge thread. Returns false if it was already running.
    pub fn start_background_compaction(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Ok(false);
        }
        let target: Arc<dyn Compactable> = self.inner.clone();
        *scheduler = Some(MergeScheduler::start(&self.inner.config.merge, target)?);
        Ok(true)
    }

    /// Stop the merge thread, waiting up to `shutdown_timeout` for an
    /// in-flight merge. Returns false if it was not running.
    pub fn stop_background_compaction(&self) -> Result<bool> {
        let scheduler = self.scheduler.lock().take();
        match scheduler {
            Some(scheduler) => {
                scheduler.stop(self.inner.config.shutdown_timeout)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_background_compaction_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Write a consistent copy of the data source into `dir`, which must be
    /// empty or not exist. The copy can be opened like any data source.
    pub fn snapshot(&self, dir: &Path) -> Result<()> {
        let inner = &*self.inner;
        inner.ensure_open()?;
        if dir.exists() && fs::read_dir(dir)?.next().is_some() {
            return Err(VirtDbError::IllegalArgument(format!(
                "snapshot directory {} is not empty",
                dir.display()
            )));
        }
        fs::create_dir_all(dir)?;

        let _merge_guard = inner.merge_lock.lock();
        inner.hash_store.snapshot(dir)?;
        inner.leaves.snapshot(&dir.join(Self::LEAVES_NAME))?;
        match &inner.key_index {
            KeyIndex::Long { list, .. } => list.write_to_file(&dir.join(Self::LONG_KEY_INDEX_FILE))?,
            KeyIndex::Hashed(map) => map.snapshot(&dir.join(Self::KEY_TO_PATH_NAME))?,
        }
        inner.current_metadata().write(dir)?;

        info!(label = %inner.config.label, dir = %dir.display(), "Wrote snapshot");
        Ok(())
    }

    /// Stop merging and close every store. Idempotent.
    ///
    /// Waits up to `shutdown_timeout` for an in-flight merge; on timeout
    /// returns `MergeTimeout` and the on-disk state must not be trusted.
    pub fn close(&self) -> Result<()> {
        let inner = &*self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let timeout = inner.config.shutdown_timeout;

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop(timeout)?;
        }
        let _merge_guard = inner
            .merge_lock
            .try_lock_for(timeout)
            .ok_or(VirtDbError::MergeTimeout(timeout))?;

        inner.hash_store.close()?;
        inner.leaves.close()?;
        match &inner.key_index {
            KeyIndex::Long { list, file } => list.write_to_file(file)?,
            KeyIndex::Hashed(map) => map.close()?,
        }
        inner.current_metadata().write(&inner.dir)?;

        info!(label = %inner.config.label, "Closed virtual data source");
        Ok(())
    }

    /// Close and remove every file of the data source
    pub fn close_and_delete(&self) -> Result<()> {
        self.close()?;
        fs::remove_dir_all(&self.inner.dir)?;
        info!(label = %self.inner.config.label, dir = %self.inner.dir.display(), "Deleted data source");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn first_leaf_path(&self) -> i64 {
        self.inner.leaf_range.read().min_valid_key
    }

    pub fn last_leaf_path(&self) -> i64 {
        self.inner.leaf_range.read().max_valid_key
    }

    pub fn is_long_key_mode(&self) -> bool {
        matches!(self.inner.key_index, KeyIndex::Long { .. })
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.dir
    }

    /// The RAM/disk threshold fixed when the data source was created
    pub fn internal_hashes_ram_to_disk_threshold(&self) -> i64 {
        self.inner.threshold
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DataSourceStats {
        let inner = &*self.inner;
        let key_to_path = match &inner.key_index {
            KeyIndex::Long { .. } => StoreStats::default(),
            KeyIndex::Hashed(map) => StoreStats {
                files: map.file_count(),
                bytes: map.total_size_bytes(),
            },
        };
        DataSourceStats {
            internal_hashes: StoreStats {
                files: inner.hash_store.file_count(),
                bytes: inner.hash_store.total_size_bytes(),
            },
            leaves: StoreStats {
                files: inner.leaves.file_count(),
                bytes: inner.leaves.total_size_bytes(),
            },
            key_to_path,
        }
    }
}

impl<K: VirtualKey, V: VirtualValue> Drop for VirtualDataSource<K, V> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(label = %self.inner.config.label, error = %e, "Failed to close data source on drop");
        }
    }
}

// =============================================================================
// Inner Helpers
// =============================================================================

impl<K: VirtualKey, V: VirtualValue> Inner<K, V> {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VirtDbError::IllegalState(format!(
                "data source {} is closed",
                self.config.label
            )));
        }
        Ok(())
    }

    fn validate_batch(
        &self,
        first_leaf_path: i64,
        last_leaf_path: i64,
        internal_records: &[InternalRecord],
        leaf_records: &[LeafRecord<K, V>],
    ) -> Result<()> {
        validate_leaf_path_range(first_leaf_path, last_leaf_path, self.config.max_num_of_paths())?;
        validate_internal_records(first_leaf_path, internal_records)?;
        validate_leaf_paths(
            first_leaf_path,
            last_leaf_path,
            leaf_records.iter().map(|r| r.path),
        )?;
        for record in leaf_records {
            let problem = size_violation(&record.key, "key")
                .or_else(|| size_violation(&record.value, "value"));
            if let Some(problem) = problem {
                return Err(VirtDbError::IllegalArgument(format!(
                    "leaf record at path {}: {}",
                    record.path, problem
                )));
            }
        }
        if let KeyIndex::Long { list, .. } = &self.key_index {
            for record in leaf_records {
                let long_key = long_key_of(&record.key).unwrap_or(u64::MAX);
                if long_key >= list.capacity() {
                    return Err(VirtDbError::IllegalArgument(format!(
                        "long key {} is beyond the long key index capacity {}",
                        long_key,
                        list.capacity()
                    )));
                }
            }
        }
        Ok(())
    }

    fn prepare_leaves(
        &self,
        first_leaf_path: i64,
        last_leaf_path: i64,
        records: &[LeafRecord<K, V>],
    ) -> Result<PendingBatch> {
        if records.is_empty() {
            return Ok(PendingBatch::range_only(first_leaf_path, last_leaf_path));
        }
        self.leaves.prepare_batch(records, first_leaf_path, last_leaf_path)
    }

    /// Stage the round's key index changes: puts in batch order, then
    /// deletions
    fn prepare_key_index(&self, records: &[LeafRecord<K, V>], deleted_keys: &[K]) -> Result<PendingKeys> {
        match &self.key_index {
            KeyIndex::Long { .. } => {
                let puts = records
                    .iter()
                    .filter_map(|r| long_key_of(&r.key).map(|k| (k, Some(encode_path(r.path)))));
                let deletes = deleted_keys
                    .iter()
                    .filter_map(|key| long_key_of(key).map(|k| (k, None)));
                Ok(PendingKeys::Long(puts.chain(deletes).collect()))
            }
            KeyIndex::Hashed(map) => {
                if records.is_empty() && deleted_keys.is_empty() {
                    return Ok(PendingKeys::Unchanged);
                }
                map.start_writing()?;
                let staged = records
                    .iter()
                    .try_for_each(|record| map.put(&record.key, record.path))
                    .and_then(|_| deleted_keys.iter().try_for_each(|key| map.delete(key)));
                if let Err(e) = staged {
                    map.abort_writing();
                    return Err(e);
                }
                map.prepare_writing().map(PendingKeys::Hashed)
            }
        }
    }

    /// Publish every part of a round, or discard them all if any writer failed
    fn finish_round(&self, round: PreparedRound, range: KeyRange) -> Result<()> {
        match (round.hashes, round.leaves, round.keys) {
            (Ok(hashes), Ok(leaves), Ok(keys)) => {
                self.hash_store.publish(hashes)?;
                self.leaves.publish(leaves)?;
                self.publish_key_index(keys)?;
                *self.leaf_range.write() = range;
                Ok(())
            }
            (hashes, leaves, keys) => {
                let mut errors = Vec::new();
                match hashes {
                    Ok(pending) => self.log_discard(self.hash_store.discard(pending)),
                    Err(e) => errors.push(e),
                }
                match leaves {
                    Ok(pending) => self.log_discard(self.leaves.discard(pending)),
                    Err(e) => errors.push(e),
                }
                match keys {
                    Ok(PendingKeys::Hashed(pending)) => {
                        if let KeyIndex::Hashed(map) = &self.key_index {
                            self.log_discard(map.discard(pending));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => errors.push(e),
                }
                let error = errors.into_iter().next().unwrap_or_else(|| {
                    VirtDbError::IllegalState("save_records round failed".to_string())
                });
                warn!(label = %self.config.label, error = %error, "Discarded failed save_records round");
                Err(error)
            }
        }
    }

    fn publish_key_index(&self, keys: PendingKeys) -> Result<()> {
        match (keys, &self.key_index) {
            (PendingKeys::Long(changes), KeyIndex::Long { list, .. }) => {
                for (long_key, path) in changes {
                    match path {
                        Some(path) => list.put(long_key, path)?,
                        None => {
                            list.remove(long_key);
                        }
                    }
                }
                Ok(())
            }
            (PendingKeys::Hashed(batch), KeyIndex::Hashed(map)) => map.publish(batch),
            _ => Ok(()),
        }
    }

    fn log_discard(&self, outcome: Result<()>) {
        if let Err(e) = outcome {
            warn!(label = %self.config.label, error = %e, "Failed to discard unpublished data file");
        }
    }

    fn current_metadata(&self) -> DataSourceMetadata {
        let range = *self.leaf_range.read();
        let mut metadata = DataSourceMetadata::new(
            self.threshold,
            matches!(self.key_index, KeyIndex::Long { .. }),
        );
        metadata.first_leaf_path = range.min_valid_key;
        metadata.last_leaf_path = range.max_valid_key;
        metadata
    }
}

impl<K: VirtualKey, V: VirtualValue> Compactable for Inner<K, V> {
    fn label(&self) -> &str {
        &self.config.label
    }

    /// Merge every store with the tier's filter. A closed data source is
    /// skipped quietly so a wake-up racing with `close` is harmless.
    fn compact(&self, kind: MergeKind) -> Result<MergeStats> {
        let _merge_guard = self.merge_lock.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Ok(MergeStats::default());
        }

        let started = Instant::now();
        let filter = kind.filter(&self.config.merge);
        let min_files = self.config.merge.min_files_in_merge;

        let mut stats = MergeStats::default();
        if let Some(s) = self.hash_store.merge(filter, min_files)? {
            stats.absorb(&s);
        }
        if let Some(s) = self.leaves.merge(filter, min_files)? {
            stats.absorb(&s);
        }
        if let KeyIndex::Hashed(map) = &self.key_index {
            if let Some(s) = map.merge(filter, min_files)? {
                stats.absorb(&s);
            }
        }

        info!(
            label = %self.config.label,
            ?kind,
            files_merged = stats.files_merged,
            files_created = stats.files_created,
            items = stats.items_copied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Merge complete"
        );
        Ok(stats)
    }
}

fn check_path(path: i64) -> Result<()> {
    if path < 0 {
        return Err(VirtDbError::IllegalArgument(format!("path must be >= 0, got {}", path)));
    }
    Ok(())
}

fn join_worker<T>(handle: ScopedJoinHandle<'_, Result<T>>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| VirtDbError::WorkerPanicked(what.to_string()))?
}
