//! Memory-indexed disk key/value store
//!
//! A [`DataFileCollection`] plus an in-memory [`LongList`] mapping each item's
//! key to its data location.
//!
//! ```text
//!   get(key) ──► LongList[key] ──► location ──► DataFileReader ──► item
//! ```
//!
//! Index entries written in a session are published only after the session's
//! file is sealed, so readers see a whole batch or none of it. Sealing and
//! publishing can be split (`prepare_batch` then `publish` or `discard`) when
//! several stores must commit together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::collections::LongList;
use crate::error::Result;
use crate::records::KeyRange;
use crate::serialization::DataItemSerializer;

use super::{DataFileCollection, DataFileReader, MergeFilter, MergeStats};

/// A sealed write session whose index entries and key range are not yet
/// visible
#[must_use = "a pending batch must be published or discarded"]
pub struct PendingBatch {
    sealed: Option<Arc<DataFileReader>>,
    entries: Vec<(u64, u64)>,
    range: KeyRange,
}

impl PendingBatch {
    /// A batch with no items that only moves the valid key range
    pub fn range_only(min_valid_key: i64, max_valid_key: i64) -> Self {
        Self {
            sealed: None,
            entries: Vec::new(),
            range: KeyRange::new(min_valid_key, max_valid_key),
        }
    }
}

/// Disk store addressed by `u64` keys (paths or bucket indices)
pub struct DiskKeyValueStore<S: DataItemSerializer> {
    name: String,
    index_path: PathBuf,
    collection: DataFileCollection<S>,
    index: LongList,
    /// (key, location) pairs of the open write session
    pending: Mutex<Vec<(u64, u64)>>,
}

impl<S: DataItemSerializer> DiskKeyValueStore<S> {
    /// Open or create the store `name` in `dir`.
    ///
    /// A saved index is loaded and then removed, so a crash before the next
    /// clean close forces a rebuild from the data files.
    pub fn open(
        dir: &Path,
        name: &str,
        serializer: S,
        longs_per_chunk: usize,
        max_keys: u64,
        max_data_file_bytes: u64,
    ) -> Result<Self> {
        let collection = DataFileCollection::open(dir, name, serializer, max_data_file_bytes)?;
        let index_path = dir.join(format!("{}_index.ll", name));

        let index = if index_path.exists() {
            let index = LongList::load_from_file(&index_path)?;
            fs::remove_file(&index_path)?;
            index
        } else {
            let index = LongList::new(longs_per_chunk, max_keys);
            if collection.file_count() > 0 {
                collection.replay(|key, location| index.put(key, location))?;
                info!(store = %name, entries = index.size(), "Rebuilt index from data files");
            }
            index
        };

        Ok(Self {
            name: name.to_string(),
            index_path,
            collection,
            index,
            pending: Mutex::new(Vec::new()),
        })
    }

    // =========================================================================
    // Writing
    // =========================================================================

    pub fn start_writing(&self) -> Result<()> {
        self.collection.start_writing()?;
        self.pending.lock().clear();
        Ok(())
    }

    /// Append an item to the open session, keyed by its header key
    pub fn put(&self, item: &S::Item) -> Result<()> {
        let (key, location) = self.collection.store_data_item(item)?;
        self.pending.lock().push((key, location));
        Ok(())
    }

    /// Seal the session and publish its index entries
    pub fn end_writing(&self, min_valid_key: i64, max_valid_key: i64) -> Result<()> {
        let batch = self.seal_writing(min_valid_key, max_valid_key)?;
        self.publish(batch)
    }

    /// Seal the session without publishing anything. The batch must be
    /// handed to `publish` or `discard`.
    pub fn seal_writing(&self, min_valid_key: i64, max_valid_key: i64) -> Result<PendingBatch> {
        let sealed = self.collection.seal_writing();
        let entries = std::mem::take(&mut *self.pending.lock());
        Ok(PendingBatch {
            sealed: sealed?,
            entries,
            range: KeyRange::new(min_valid_key, max_valid_key),
        })
    }

    /// Make a sealed batch visible: the valid key range first, then the
    /// index entries
    pub fn publish(&self, batch: PendingBatch) -> Result<()> {
        self.set_valid_key_range(batch.range.min_valid_key, batch.range.max_valid_key);
        for (key, location) in batch.entries {
            self.index.put(key, location)?;
        }
        if let Some(reader) = batch.sealed {
            reader.mark_available_for_merge();
        }
        Ok(())
    }

    /// Drop a sealed batch, deleting its file
    pub fn discard(&self, batch: PendingBatch) -> Result<()> {
        match batch.sealed {
            Some(reader) => self.collection.discard_file(&reader),
            None => Ok(()),
        }
    }

    /// Discard the open session without publishing anything
    pub fn abort_writing(&self) {
        self.pending.lock().clear();
        self.collection.abort_writing();
    }

    /// Write and seal `items` as one session without publishing them
    pub fn prepare_batch<'a, I>(&self, items: I, min_valid_key: i64, max_valid_key: i64) -> Result<PendingBatch>
    where
        I: IntoIterator<Item = &'a S::Item>,
        S::Item: 'a,
    {
        self.start_writing()?;
        match items.into_iter().try_for_each(|item| self.put(item)) {
            Ok(()) => self.seal_writing(min_valid_key, max_valid_key),
            Err(e) => {
                self.abort_writing();
                Err(e)
            }
        }
    }

    /// Write `items` as one session: either every index entry is published
    /// or, on error, none is
    pub fn write_batch<'a, I>(&self, items: I, min_valid_key: i64, max_valid_key: i64) -> Result<()>
    where
        I: IntoIterator<Item = &'a S::Item>,
        S::Item: 'a,
    {
        let batch = self.prepare_batch(items, min_valid_key, max_valid_key)?;
        self.publish(batch)
    }

    pub fn set_valid_key_range(&self, min_valid_key: i64, max_valid_key: i64) {
        self.collection.set_valid_key_range(min_valid_key, max_valid_key);
    }

    pub fn valid_key_range(&self) -> KeyRange {
        self.collection.valid_key_range()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Item stored for `key`, `None` if there is none
    pub fn get(&self, key: u64) -> Result<Option<S::Item>> {
        self.collection.read_using_index(&self.index, key)
    }

    /// Visit every item whose key is in the valid key range
    pub fn for_each_live<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(S::Item) -> Result<()>,
    {
        let range = self.valid_key_range();
        let mut keys = Vec::new();
        self.index.for_each(|key, _| {
            if range.within_range(key as i64) {
                keys.push(key);
            }
            Ok(())
        })?;
        for key in keys {
            if let Some(item) = self.get(key)? {
                f(item)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Merging & Lifecycle
    // =========================================================================

    /// Merge the files selected by `filter`, unless fewer than `min_files`
    /// qualify
    pub fn merge(&self, filter: MergeFilter, min_files: usize) -> Result<Option<MergeStats>> {
        let files = self.collection.files_for_merge(filter);
        if files.is_empty() || files.len() < min_files {
            return Ok(None);
        }
        self.collection.merge(&self.index, &files).map(Some)
    }

    /// Finish any open session and persist the index
    pub fn close(&self) -> Result<()> {
        if self.collection.is_writing() {
            let range = self.valid_key_range();
            self.end_writing(range.min_valid_key, range.max_valid_key)?;
        }
        self.collection.close()?;
        self.index.write_to_file(&self.index_path)?;
        Ok(())
    }

    /// Write a self-contained copy of the store into `dir`
    pub fn snapshot(&self, dir: &Path) -> Result<()> {
        self.collection.snapshot(dir)?;
        let index_name = self.index_path.file_name().map(PathBuf::from);
        if let Some(index_name) = index_name {
            self.index.write_to_file(&dir.join(index_name))?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &LongList {
        &self.index
    }

    pub fn collection(&self) -> &DataFileCollection<S> {
        &self.collection
    }

    pub fn file_count(&self) -> usize {
        self.collection.file_count()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.collection.total_size_bytes()
    }
}
