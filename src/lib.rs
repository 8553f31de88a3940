//! # VirtDB
//!
//! A log-structured virtual key/value engine for Merkle-tree state:
//! - Append-only, checksummed data files per store
//! - In-memory indices from keys to data locations
//! - Tiered storage of internal node hashes (RAM below a threshold path)
//! - Background merging of small files into large ones
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    VirtualDataSource<K, V>                  │
//! │         save_records / load_* / snapshot / close            │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐       ┌─────────────┐       ┌──────────────────┐
//! │  HashStore  │       │   Leaves    │       │   key -> path    │
//! │ RAM │ disk  │       │ path->leaf  │       │ LongList | HDHM  │
//! └──────┬──────┘       └──────┬──────┘       └────────┬─────────┘
//!        │                     │                       │
//!        └─────────────────────┼───────────────────────┘
//!                              ▼
//!                  ┌──────────────────────┐
//!                  │  DiskKeyValueStore   │
//!                  │ LongList + data files│ ◄── MergeScheduler
//!                  └──────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod hash;
pub mod records;
pub mod serialization;
pub mod collections;
pub mod files;
pub mod hashmap;
pub mod hash_store;
pub mod merge;
pub mod datasource;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VirtDbError};
pub use config::{Config, ConfigBuilder, MergeConfig};
pub use hash::{Hash, HASH_SIZE};
pub use records::{InternalRecord, KeyRange, LeafRecord, INVALID_PATH};
pub use serialization::{LongKey, Serializable, SerializedSize, VirtualKey, VirtualValue};
pub use merge::MergeKind;
pub use datasource::{DataSourceStats, StoreStats, VirtualDataSource};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of VirtDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
