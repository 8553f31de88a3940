//! Configuration for virtdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, VirtDbError};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Main configuration for a virtual data source
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files of this data source
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── metadata.vds            (data source metadata)
    ///     ├── internal_hashes_ram.hl  (RAM hash list, written on close)
    ///     ├── internal_hashes/        (disk hash store)
    ///     ├── leaves/                 (path -> hash, key, value)
    ///     ├── key_to_path/            (half-disk hash map)
    ///     └── long_key_to_path.ll     (long key mode index)
    pub data_dir: PathBuf,

    /// Label used in logs and background thread names
    pub label: String,

    /// Upper bound on the number of leaf keys, used to size indices
    pub max_num_of_keys: u64,

    /// Paths below this value keep their hash in RAM, the rest go to disk.
    /// 0 means everything on disk, i64::MAX means everything in RAM.
    /// Only honoured when the data source is first created.
    pub internal_hashes_ram_to_disk_threshold: i64,

    /// Number of slots per lazily allocated chunk in long and hash lists
    pub longs_per_chunk: usize,

    /// Size at which a merge rolls over to a new output file
    pub max_data_file_bytes: u64,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Start the background merge thread on open
    pub merging_enabled: bool,

    /// Merge cadence and file selection
    pub merge: MergeConfig,

    /// How long close() waits for an in-flight merge
    pub shutdown_timeout: Duration,
}

/// Merge tier timing and file selection
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// How often the merge thread wakes up
    pub activate_period: Duration,

    /// Minimum time between medium merges
    pub medium_merge_period: Duration,

    /// Minimum time between full merges
    pub full_merge_period: Duration,

    /// Small merges only take files below this size
    pub small_merge_cutoff_bytes: u64,

    /// Medium merges only take files below this size
    pub medium_merge_cutoff_bytes: u64,

    /// Stores with fewer candidate files than this are not merged
    pub min_files_in_merge: usize,

    /// Upper bound on files taken by small and medium merges
    pub max_files_in_merge: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            activate_period: Duration::from_secs(5 * 60),
            medium_merge_period: Duration::from_secs(30 * 60),
            full_merge_period: Duration::from_secs(2 * 60 * 60),
            small_merge_cutoff_bytes: 3 * GIB,
            medium_merge_cutoff_bytes: 20 * GIB,
            min_files_in_merge: 3,
            max_files_in_merge: 64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./virtdb_data"),
            label: "virtdb".to_string(),
            max_num_of_keys: 100_000_000,
            internal_hashes_ram_to_disk_threshold: 1 << 20,
            longs_per_chunk: 1 << 20,
            max_data_file_bytes: GIB,
            merging_enabled: true,
            merge: MergeConfig::default(),
            shutdown_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(VirtDbError::Config("label must not be empty".to_string()));
        }
        if self.max_num_of_keys == 0 {
            return Err(VirtDbError::Config("max_num_of_keys must be positive".to_string()));
        }
        if self.internal_hashes_ram_to_disk_threshold < 0 {
            return Err(VirtDbError::Config(format!(
                "internal_hashes_ram_to_disk_threshold must be >= 0, got {}",
                self.internal_hashes_ram_to_disk_threshold
            )));
        }
        if self.longs_per_chunk == 0 {
            return Err(VirtDbError::Config("longs_per_chunk must be positive".to_string()));
        }
        if self.max_data_file_bytes < KIB {
            return Err(VirtDbError::Config(format!(
                "max_data_file_bytes must be at least {} bytes",
                KIB
            )));
        }
        if self.merge.min_files_in_merge < 1 {
            return Err(VirtDbError::Config("min_files_in_merge must be at least 1".to_string()));
        }
        if self.merge.max_files_in_merge < self.merge.min_files_in_merge {
            return Err(VirtDbError::Config(format!(
                "max_files_in_merge ({}) is below min_files_in_merge ({})",
                self.merge.max_files_in_merge, self.merge.min_files_in_merge
            )));
        }
        if self.merge.activate_period.is_zero() {
            return Err(VirtDbError::Config("merge activate_period must be positive".to_string()));
        }
        Ok(())
    }

    /// Largest tree path the indices must address: a tree with n leaves uses
    /// paths up to 2n - 2.
    pub fn max_num_of_paths(&self) -> u64 {
        self.max_num_of_keys.saturating_mul(2)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the label used in logs and thread names
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    /// Set the maximum number of keys
    pub fn max_num_of_keys(mut self, count: u64) -> Self {
        self.config.max_num_of_keys = count;
        self
    }

    /// Set the RAM/disk threshold for internal hashes
    pub fn internal_hashes_ram_to_disk_threshold(mut self, threshold: i64) -> Self {
        self.config.internal_hashes_ram_to_disk_threshold = threshold;
        self
    }

    /// Set the chunk size of long and hash lists
    pub fn longs_per_chunk(mut self, count: usize) -> Self {
        self.config.longs_per_chunk = count;
        self
    }

    /// Set the merge output file roll-over size (in bytes)
    pub fn max_data_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_data_file_bytes = bytes;
        self
    }

    /// Enable or disable the background merge thread
    pub fn merging_enabled(mut self, enabled: bool) -> Self {
        self.config.merging_enabled = enabled;
        self
    }

    /// Replace the merge configuration
    pub fn merge(mut self, merge: MergeConfig) -> Self {
        self.config.merge = merge;
        self
    }

    /// Set how often the merge thread wakes up
    pub fn merge_activate_period(mut self, period: Duration) -> Self {
        self.config.merge.activate_period = period;
        self
    }

    /// Set the minimum number of files a merge needs
    pub fn min_files_in_merge(mut self, count: usize) -> Self {
        self.config.merge.min_files_in_merge = count;
        self
    }

    /// Set how long close() waits for an in-flight merge
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
