//! Virtual data source: the public face of the engine
//!
//! ```text
//!   VirtualDataSource<K, V>
//!     ├── metadata.vds                    leaf range, threshold, key mode
//!     ├── internal_hashes_ram.hl          HashStore RAM tier
//!     ├── internal_hashes/                HashStore disk tier
//!     ├── leaves/                         path -> LeafRecord
//!     └── key_to_path/ | long_key_to_path.ll
//! ```

mod metadata;
mod paths;
mod source;

pub use metadata::{DataSourceMetadata, METADATA_FILE};
pub use source::{DataSourceStats, StoreStats, VirtualDataSource, LONG_KEY_INDEX_CAPACITY};
