//! Data File Collection
//!
//! All data files of one logical store, plus the single write session and
//! the merge that consolidates files.
//!
//! ## Lifecycle of a file
//! ```text
//!  start_writing ──► store_data_item* ──► end_writing ──► index updated
//!   (incomplete)         (appending)         (sealed)     (mergeable)
//!                                                              │
//!                                            merge copies live items forward
//!                                                              │
//!                                                              ▼
//!                                                          (deleted)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collections::LongList;
use crate::error::{Result, VirtDbError};
use crate::records::KeyRange;
use crate::serialization::DataItemSerializer;

use super::location::{self, MAX_FILE_INDEX};
use super::writer::DataFileWriter;
use super::{
    data_file_path, data_location, parse_data_file_index, DataFileReader, MergeFilter, MergeStats,
    HEADER_SIZE, NON_EXISTENT_DATA_LOCATION, READ_RETRIES,
};

/// Persisted state of a collection that is not in any data file header
#[derive(Debug, Serialize, Deserialize)]
struct CollectionMetadata {
    min_valid_key: i64,
    max_valid_key: i64,
}

/// An item found live during a merge
struct LiveItem {
    key: u64,
    location: u64,
    data_version: u64,
    bytes: Bytes,
}

/// An index entry to move from one location to another
struct Relocation {
    key: u64,
    from: u64,
    to: u64,
}

/// A set of data files for one store
///
/// ## Concurrency:
/// - `files`: RwLock map of sealed files, keyed by file index
/// - `writer`: at most one open write session; callers serialize writes
/// - `next_file_index`: atomic counter shared by the writer and merges
/// - Merges write their own files and never touch the write session
pub struct DataFileCollection<S: DataItemSerializer> {
    dir: PathBuf,
    store_name: String,
    serializer: S,
    max_data_file_bytes: u64,
    files: RwLock<BTreeMap<u32, Arc<DataFileReader>>>,
    next_file_index: AtomicU32,
    last_creation_ms: AtomicU64,
    writer: Mutex<Option<DataFileWriter>>,
    valid_key_range: RwLock<KeyRange>,
}

impl<S: DataItemSerializer> DataFileCollection<S> {
    /// Open or create the collection `store_name` in `dir`
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Discover data files, deleting any that were never sealed
    /// 3. Restore the valid key range from the metadata file
    /// 4. Continue file numbering after the highest index seen
    pub fn open(dir: &Path, store_name: &str, serializer: S, max_data_file_bytes: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut files = BTreeMap::new();
        let mut max_index: Option<u32> = None;
        let mut last_creation_ms = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(index) = parse_data_file_index(&path, store_name) else {
                continue;
            };
            max_index = Some(max_index.map_or(index, |m| m.max(index)));

            let size = fs::metadata(&path)?.len();
            let completed = size >= HEADER_SIZE && DataFileReader::read_metadata(&path)?.completed;
            if !completed {
                warn!(store = %store_name, file = %path.display(), "Discarding incomplete data file");
                fs::remove_file(&path)?;
                continue;
            }

            let reader = DataFileReader::open(&path)?;
            if reader.index() != index {
                return Err(VirtDbError::Corruption(format!(
                    "{} claims file index {}",
                    path.display(),
                    reader.index()
                )));
            }
            // Files on disk at open are covered by the loaded or rebuilt index
            reader.mark_available_for_merge();
            last_creation_ms = last_creation_ms.max(reader.metadata().creation_ms);
            files.insert(index, Arc::new(reader));
        }

        let valid_key_range = match Self::load_metadata(dir, store_name)? {
            Some(meta) => KeyRange::new(meta.min_valid_key, meta.max_valid_key),
            None => KeyRange::UNBOUNDED,
        };

        info!(
            store = %store_name,
            files = files.len(),
            dir = %dir.display(),
            "Opened data file collection"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            store_name: store_name.to_string(),
            serializer,
            max_data_file_bytes,
            files: RwLock::new(files),
            next_file_index: AtomicU32::new(max_index.map_or(0, |m| m + 1)),
            last_creation_ms: AtomicU64::new(last_creation_ms),
            writer: Mutex::new(None),
            valid_key_range: RwLock::new(valid_key_range),
        })
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Open a new data file for a write session
    pub fn start_writing(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if writer.is_some() {
            return Err(VirtDbError::IllegalState(format!(
                "{}: a write session is already open",
                self.store_name
            )));
        }
        let index = self.allocate_file_index()?;
        let path = data_file_path(&self.dir, &self.store_name, index);
        *writer = Some(DataFileWriter::create(
            &path,
            index,
            self.next_creation_ms(),
            self.serializer.data_version(),
        )?);
        Ok(())
    }

    pub fn is_writing(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Append an item to the open write session.
    ///
    /// Returns the item's index key and its data location. The location is
    /// readable only after `end_writing`.
    pub fn store_data_item(&self, item: &S::Item) -> Result<(u64, u64)> {
        let mut buf = BytesMut::new();
        self.serializer.serialize(item, &mut buf)?;
        let header = self.serializer.read_header(&buf)?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| {
            VirtDbError::IllegalState(format!("{}: no write session is open", self.store_name))
        })?;
        let offset = writer.write_item(header.key, &buf)?;
        Ok((header.key, data_location(writer.index(), offset)))
    }

    /// Seal the session's file and record the new valid key range.
    ///
    /// The file is registered for reads but not yet available for merging;
    /// the caller marks it once its index entries are published. A session
    /// that wrote nothing leaves no file behind.
    pub fn end_writing(&self, min_valid_key: i64, max_valid_key: i64) -> Result<Option<Arc<DataFileReader>>> {
        self.set_valid_key_range(min_valid_key, max_valid_key);
        self.seal_writing()
    }

    /// Seal the session's file without touching the valid key range
    pub fn seal_writing(&self) -> Result<Option<Arc<DataFileReader>>> {
        let writer = self.writer.lock().take().ok_or_else(|| {
            VirtDbError::IllegalState(format!("{}: no write session is open", self.store_name))
        })?;

        let path = writer.path().to_path_buf();
        if writer.item_count() == 0 {
            drop(writer);
            fs::remove_file(&path)?;
            return Ok(None);
        }

        let metadata = writer.finish()?;
        let reader = Arc::new(DataFileReader::open(&path)?);
        self.files.write().insert(metadata.index, reader.clone());

        debug!(
            store = %self.store_name,
            file = metadata.index,
            items = metadata.item_count,
            "Sealed data file"
        );
        Ok(Some(reader))
    }

    /// Drop the open write session and its file, if any
    pub fn abort_writing(&self) {
        if let Some(writer) = self.writer.lock().take() {
            let path = writer.path().to_path_buf();
            drop(writer);
            if let Err(e) = fs::remove_file(&path) {
                warn!(store = %self.store_name, error = %e, "Failed to remove aborted data file");
            }
        }
    }

    /// Unregister and delete a sealed file that nothing points into
    pub fn discard_file(&self, reader: &Arc<DataFileReader>) -> Result<()> {
        self.files.write().remove(&reader.index());
        reader.delete()?;
        debug!(store = %self.store_name, file = reader.index(), "Discarded unpublished data file");
        Ok(())
    }

    pub fn valid_key_range(&self) -> KeyRange {
        *self.valid_key_range.read()
    }

    pub fn set_valid_key_range(&self, min_valid_key: i64, max_valid_key: i64) {
        *self.valid_key_range.write() = KeyRange::new(min_valid_key, max_valid_key);
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read the item at `location`.
    ///
    /// Returns `Ok(None)` for the absent location or when the file holding it
    /// has been retired.
    pub fn read_data_item(&self, location: u64) -> Result<Option<S::Item>> {
        let Some(index) = location::file_index(location) else {
            return Ok(None);
        };
        let reader = match self.files.read().get(&index) {
            Some(reader) => reader.clone(),
            None => return Ok(None),
        };
        match reader.read(location::byte_offset(location))? {
            Some(bytes) => self
                .serializer
                .deserialize(&bytes, reader.metadata().data_version)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Read the item `index` maps `key` to.
    ///
    /// A merge may retire a file between the index lookup and the read, so
    /// the lookup is repeated a few times before giving up.
    pub fn read_using_index(&self, index: &LongList, key: u64) -> Result<Option<S::Item>> {
        let mut last_error = None;
        for attempt in 1..=READ_RETRIES {
            let location = index.get(key, NON_EXISTENT_DATA_LOCATION);
            if location == NON_EXISTENT_DATA_LOCATION {
                return Ok(None);
            }
            match self.read_data_item(location) {
                Ok(Some(item)) => return Ok(Some(item)),
                Ok(None) => {
                    last_error = Some(VirtDbError::Corruption(format!(
                        "{}: key {} maps to {} which no longer exists",
                        self.store_name,
                        key,
                        location::describe(location)
                    )));
                }
                Err(e) => last_error = Some(e),
            }
            warn!(store = %self.store_name, key, attempt, "Retrying read of moved data item");
        }
        Err(last_error.unwrap_or_else(|| {
            VirtDbError::IllegalState(format!("{}: read of key {} failed", self.store_name, key))
        }))
    }

    /// Visit every item oldest to newest, so later calls for a key win.
    /// Used to rebuild an index from the files alone.
    pub fn replay<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, u64) -> Result<()>,
    {
        for file in self.sorted_files() {
            for entry in file.iter()? {
                let (offset, bytes) = entry?;
                let header = self.serializer.read_header(&bytes)?;
                f(header.key, data_location(file.index(), offset))?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Files eligible for merging, oldest to newest, narrowed by `filter`
    pub fn files_for_merge(&self, filter: MergeFilter) -> Vec<Arc<DataFileReader>> {
        let files = self
            .sorted_files()
            .into_iter()
            .filter(|f| f.is_available_for_merge())
            .collect();
        filter.select(files)
    }

    /// Copy the live items of `sources` into new files and retire the sources.
    ///
    /// An item is live when its key is in the valid key range and `index`
    /// still points at it. Items are written in key order. Index entries are
    /// moved with compare-and-swap, so a newer location written concurrently
    /// always wins.
    pub fn merge(&self, index: &LongList, sources: &[Arc<DataFileReader>]) -> Result<MergeStats> {
        if sources.is_empty() {
            return Ok(MergeStats::default());
        }
        let range = self.valid_key_range();
        let creation_ms = sources
            .iter()
            .map(|f| f.metadata().creation_ms)
            .max()
            .unwrap_or(0);

        // 1. Find live items; drop index entries for keys outside the range
        let mut live = Vec::new();
        for file in sources {
            for entry in file.iter()? {
                let (offset, bytes) = entry?;
                let header = self.serializer.read_header(&bytes)?;
                let location = data_location(file.index(), offset);
                if index.get(header.key, NON_EXISTENT_DATA_LOCATION) != location {
                    continue;
                }
                if !range.within_range(header.key as i64) {
                    index.remove_if_equal(header.key, location);
                    continue;
                }
                live.push(LiveItem {
                    key: header.key,
                    location,
                    data_version: file.metadata().data_version,
                    bytes,
                });
            }
        }
        live.sort_by_key(|item| item.key);

        // 2. Write them forward
        let mut created = Vec::new();
        let output = self.copy_items(&live, creation_ms, &mut created);
        let (outputs, relocations) = match output {
            Ok(output) => output,
            Err(e) => {
                for path in &created {
                    let _ = fs::remove_file(path);
                }
                return Err(e);
            }
        };

        // 3. Publish the new files, then move the index entries
        {
            let mut files = self.files.write();
            for reader in &outputs {
                files.insert(reader.index(), reader.clone());
            }
        }
        let mut items_relocated = 0;
        for relocation in &relocations {
            if index.put_if_equal(relocation.key, relocation.from, relocation.to)? {
                items_relocated += 1;
            }
        }
        for reader in &outputs {
            reader.mark_available_for_merge();
        }

        // 4. Retire the sources
        {
            let mut files = self.files.write();
            for source in sources {
                files.remove(&source.index());
            }
        }
        for source in sources {
            source.delete()?;
        }

        let stats = MergeStats {
            files_merged: sources.len(),
            files_created: outputs.len(),
            items_copied: relocations.len() as u64,
            items_relocated,
            bytes_before: sources.iter().map(|f| f.size()).sum(),
            bytes_after: outputs.iter().map(|f| f.size()).sum(),
        };
        info!(
            store = %self.store_name,
            files_merged = stats.files_merged,
            files_created = stats.files_created,
            items = stats.items_copied,
            "Merged data files"
        );
        Ok(stats)
    }

    fn copy_items(
        &self,
        live: &[LiveItem],
        creation_ms: u64,
        created: &mut Vec<PathBuf>,
    ) -> Result<(Vec<Arc<DataFileReader>>, Vec<Relocation>)> {
        let data_version = self.serializer.data_version();
        let mut outputs = Vec::new();
        let mut relocations = Vec::with_capacity(live.len());
        let mut writer: Option<DataFileWriter> = None;
        let mut buf = BytesMut::new();

        for item in live {
            // Roll over to a new file once the current one is full
            if writer
                .as_ref()
                .is_some_and(|w| w.bytes_written() >= self.max_data_file_bytes)
            {
                if let Some(full) = writer.take() {
                    outputs.push(seal(full)?);
                }
            }
            if writer.is_none() {
                let index = self.allocate_file_index()?;
                let path = data_file_path(&self.dir, &self.store_name, index);
                created.push(path.clone());
                writer = Some(DataFileWriter::create(&path, index, creation_ms, data_version)?);
            }
            if let Some(w) = writer.as_mut() {
                buf.clear();
                self.serializer
                    .reserialize(&item.bytes, item.data_version, &mut buf)?;
                let offset = w.write_item(item.key, &buf)?;
                relocations.push(Relocation {
                    key: item.key,
                    from: item.location,
                    to: data_location(w.index(), offset),
                });
            }
        }
        if let Some(last) = writer.take() {
            outputs.push(seal(last)?);
        }
        Ok((outputs, relocations))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Seal any open write session and persist the collection metadata
    pub fn close(&self) -> Result<()> {
        if self.is_writing() {
            let range = self.valid_key_range();
            if let Some(reader) = self.end_writing(range.min_valid_key, range.max_valid_key)? {
                reader.mark_available_for_merge();
            }
        }
        self.write_metadata(&self.dir)?;
        debug!(store = %self.store_name, "Closed data file collection");
        Ok(())
    }

    /// Hard-link every sealed file plus the metadata into `dir`.
    /// Falls back to copying when the target is on another file system.
    pub fn snapshot(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.write_metadata(dir)?;
        for file in self.sorted_files() {
            let Some(name) = file.path().file_name() else {
                continue;
            };
            let target = dir.join(name);
            if fs::hard_link(file.path(), &target).is_err() {
                fs::copy(file.path(), &target)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Sealed files ordered oldest to newest (creation time, then index)
    pub fn sorted_files(&self) -> Vec<Arc<DataFileReader>> {
        let mut files: Vec<_> = self.files.read().values().cloned().collect();
        files.sort_by_key(|f| (f.metadata().creation_ms, f.index()));
        files
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.files.read().values().map(|f| f.size()).sum()
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn allocate_file_index(&self) -> Result<u32> {
        let index = self.next_file_index.fetch_add(1, Ordering::SeqCst);
        if index > MAX_FILE_INDEX {
            return Err(VirtDbError::IllegalState(format!(
                "{}: ran out of data file indices",
                self.store_name
            )));
        }
        Ok(index)
    }

    /// Wall-clock milliseconds, bumped so every new file is strictly newer
    fn next_creation_ms(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last_creation_ms.load(Ordering::Acquire);
        loop {
            let next = now.max(last + 1);
            match self.last_creation_ms.compare_exchange(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    fn metadata_path(dir: &Path, store_name: &str) -> PathBuf {
        dir.join(format!("{}_metadata.bin", store_name))
    }

    fn load_metadata(dir: &Path, store_name: &str) -> Result<Option<CollectionMetadata>> {
        let path = Self::metadata_path(dir, store_name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    fn write_metadata(&self, dir: &Path) -> Result<()> {
        let range = self.valid_key_range();
        let metadata = CollectionMetadata {
            min_valid_key: range.min_valid_key,
            max_valid_key: range.max_valid_key,
        };
        fs::write(
            Self::metadata_path(dir, &self.store_name),
            bincode::serialize(&metadata)?,
        )?;
        Ok(())
    }
}

fn seal(writer: DataFileWriter) -> Result<Arc<DataFileReader>> {
    let path = writer.path().to_path_buf();
    writer.finish()?;
    Ok(Arc::new(DataFileReader::open(&path)?))
}
