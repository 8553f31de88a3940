//! Data source metadata file

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VirtDbError};
use crate::records::INVALID_PATH;

/// Metadata file name inside the data source directory
pub const METADATA_FILE: &str = "metadata.vds";

const FORMAT_VERSION: u32 = 1;

/// State written alongside the stores: the leaf range and the choices fixed
/// when the data source was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceMetadata {
    pub format_version: u32,
    pub internal_hashes_ram_to_disk_threshold: i64,
    pub first_leaf_path: i64,
    pub last_leaf_path: i64,
    pub long_key_mode: bool,
}

impl DataSourceMetadata {
    /// Metadata of a new, empty data source
    pub fn new(internal_hashes_ram_to_disk_threshold: i64, long_key_mode: bool) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            internal_hashes_ram_to_disk_threshold,
            first_leaf_path: INVALID_PATH,
            last_leaf_path: INVALID_PATH,
            long_key_mode,
        }
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let metadata: Self = bincode::deserialize(&fs::read(&path)?)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(VirtDbError::Corruption(format!(
                "unsupported data source metadata version {} in {}",
                metadata.format_version,
                path.display()
            )));
        }
        Ok(Some(metadata))
    }

    /// Write to `dir` through a temporary file so a crash never leaves a
    /// half-written metadata file
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let tmp_path = dir.join(format!("{}.tmp", METADATA_FILE));
        fs::write(&tmp_path, bincode::serialize(self)?)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
