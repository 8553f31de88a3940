//! Hash Store
//!
//! `path -> hash` for internal tree nodes, split at a threshold path:
//!
//! ```text
//!   path <  threshold ──► HashList (RAM, written to disk on close)
//!   path >= threshold ──► DiskKeyValueStore<InternalRecordSerializer>
//! ```
//!
//! A threshold of 0 keeps everything on disk; `i64::MAX` keeps everything in
//! RAM.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collections::HashList;
use crate::config::Config;
use crate::error::{Result, VirtDbError};
use crate::files::{DiskKeyValueStore, MergeFilter, MergeStats, PendingBatch};
use crate::hash::Hash;
use crate::records::InternalRecord;
use crate::serialization::InternalRecordSerializer;

/// File name of the RAM tier inside the data source directory
pub const RAM_HASHES_FILE: &str = "internal_hashes_ram.hl";

/// Directory and store name of the disk tier
pub const DISK_HASHES_NAME: &str = "internal_hashes";

/// Hashes of one batch, sealed on disk but not yet visible
#[must_use = "pending hashes must be published or discarded"]
pub struct PendingHashes {
    ram: Vec<InternalRecord>,
    disk: PendingBatch,
    disk_count: usize,
}

/// Tiered storage for internal node hashes
pub struct HashStore {
    threshold: i64,
    ram_path: PathBuf,
    ram: Option<HashList>,
    disk: DiskKeyValueStore<InternalRecordSerializer>,
}

impl HashStore {
    /// Open or create the hash store under `dir` with the given threshold
    pub fn open(dir: &Path, threshold: i64, config: &Config) -> Result<Self> {
        let ram_path = dir.join(RAM_HASHES_FILE);
        let max_paths = config.max_num_of_paths();

        let ram = if threshold > 0 {
            if ram_path.exists() {
                Some(HashList::load_from_file(&ram_path)?)
            } else {
                let capacity = (threshold as u64).min(max_paths);
                Some(HashList::new(config.longs_per_chunk, capacity))
            }
        } else {
            None
        };

        let disk = DiskKeyValueStore::open(
            &dir.join(DISK_HASHES_NAME),
            DISK_HASHES_NAME,
            InternalRecordSerializer,
            config.longs_per_chunk,
            max_paths,
            config.max_data_file_bytes,
        )?;

        Ok(Self {
            threshold,
            ram_path,
            ram,
            disk,
        })
    }

    /// Store the hashes of one batch. `records` must be sorted by path and all
    /// below `first_leaf_path`.
    pub fn save(&self, first_leaf_path: i64, records: &[InternalRecord]) -> Result<()> {
        let pending = self.prepare(first_leaf_path, records)?;
        self.publish(pending)
    }

    /// Write the disk tier's share of a batch to a sealed file. Nothing is
    /// visible, and the RAM tier is untouched, until `publish`.
    pub fn prepare(&self, first_leaf_path: i64, records: &[InternalRecord]) -> Result<PendingHashes> {
        let split = records.partition_point(|r| r.path < self.threshold);
        let (ram_records, disk_records) = records.split_at(split);

        if !ram_records.is_empty() && self.ram.is_none() {
            return Err(VirtDbError::IllegalState(
                "hash store has no RAM tier".to_string(),
            ));
        }

        let max_valid_path = first_leaf_path - 1;
        let disk = if disk_records.is_empty() {
            PendingBatch::range_only(0, max_valid_path)
        } else {
            self.disk.prepare_batch(disk_records, 0, max_valid_path)?
        };

        Ok(PendingHashes {
            ram: ram_records.to_vec(),
            disk,
            disk_count: disk_records.len(),
        })
    }

    pub fn publish(&self, pending: PendingHashes) -> Result<()> {
        if let Some(ram) = &self.ram {
            for record in &pending.ram {
                ram.put(record.path as u64, record.hash)?;
            }
        }
        self.disk.publish(pending.disk)?;

        debug!(
            ram = pending.ram.len(),
            disk = pending.disk_count,
            "Saved internal hashes"
        );
        Ok(())
    }

    pub fn discard(&self, pending: PendingHashes) -> Result<()> {
        self.disk.discard(pending.disk)
    }

    /// Restrict the disk tier to paths below `first_leaf_path`
    pub fn set_first_leaf_path(&self, first_leaf_path: i64) {
        self.disk.set_valid_key_range(0, first_leaf_path - 1);
    }

    pub fn get(&self, path: i64) -> Result<Option<Hash>> {
        if path < 0 {
            return Ok(None);
        }
        if path < self.threshold {
            return Ok(self.ram.as_ref().and_then(|ram| ram.get(path as u64)));
        }
        Ok(self.disk.get(path as u64)?.map(|record| record.hash))
    }

    pub fn merge(&self, filter: MergeFilter, min_files: usize) -> Result<Option<MergeStats>> {
        self.disk.merge(filter, min_files)
    }

    pub fn close(&self) -> Result<()> {
        if let Some(ram) = &self.ram {
            ram.write_to_file(&self.ram_path)?;
        }
        self.disk.close()
    }

    pub fn snapshot(&self, dir: &Path) -> Result<()> {
        if let Some(ram) = &self.ram {
            ram.write_to_file(&dir.join(RAM_HASHES_FILE))?;
        }
        self.disk.snapshot(&dir.join(DISK_HASHES_NAME))
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn file_count(&self) -> usize {
        self.disk.file_count()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.disk.total_size_bytes()
    }
}
