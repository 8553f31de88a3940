//! Data File Reader
//!
//! Random-access reads from a sealed data file.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::error::{Result, VirtDbError};

use super::iterator::DataFileIterator;
use super::{DataFileMetadata, FRAME_HEADER_SIZE, HEADER_SIZE};

/// Reader for one sealed data file
///
/// ## Concurrency:
/// - `file`: positional reads only, so readers share it without locking
/// - `available_for_merge`: set once the index points into this file
/// - `deleted`: set when a merge retires the file; later reads see `None`
pub struct DataFileReader {
    path: PathBuf,
    metadata: DataFileMetadata,
    file: File,
    size: u64,
    available_for_merge: AtomicBool,
    deleted: AtomicBool,
}

impl DataFileReader {
    /// Open a sealed data file
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        let metadata = read_metadata_from(&mut file, path, size)?;
        if !metadata.completed {
            return Err(VirtDbError::Corruption(format!(
                "data file {} was never completed",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            file,
            size,
            available_for_merge: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        })
    }

    /// Read just the header of a data file
    pub fn read_metadata(path: &Path) -> Result<DataFileMetadata> {
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        read_metadata_from(&mut file, path, size)
    }

    /// Read the item whose frame starts at `byte_offset`.
    ///
    /// Returns `Ok(None)` once the file has been retired by a merge.
    pub fn read(&self, byte_offset: u64) -> Result<Option<Bytes>> {
        if self.deleted.load(Ordering::Acquire) {
            return Ok(None);
        }
        if byte_offset < HEADER_SIZE || byte_offset + FRAME_HEADER_SIZE > self.size {
            return Err(VirtDbError::Corruption(format!(
                "offset {} is outside the data area of {}",
                byte_offset,
                self.path.display()
            )));
        }

        let mut frame = [0u8; FRAME_HEADER_SIZE as usize];
        self.file.read_exact_at(&mut frame, byte_offset)?;
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as u64;
        let crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        if byte_offset + FRAME_HEADER_SIZE + len > self.size {
            return Err(VirtDbError::Corruption(format!(
                "item at offset {} in {} runs past the end of the file",
                byte_offset,
                self.path.display()
            )));
        }

        let mut item = vec![0u8; len as usize];
        self.file
            .read_exact_at(&mut item, byte_offset + FRAME_HEADER_SIZE)?;

        if crc32fast::hash(&item) != crc {
            return Err(VirtDbError::Corruption(format!(
                "checksum mismatch for item at offset {} in {}",
                byte_offset,
                self.path.display()
            )));
        }
        Ok(Some(Bytes::from(item)))
    }

    /// Sequential iteration over every item, in write order
    pub fn iter(&self) -> Result<DataFileIterator> {
        DataFileIterator::open(&self.path, self.metadata.item_count, self.size)
    }

    pub fn metadata(&self) -> &DataFileMetadata {
        &self.metadata
    }

    pub fn index(&self) -> u32 {
        self.metadata.index
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_available_for_merge(&self) -> bool {
        self.available_for_merge.load(Ordering::Acquire)
    }

    /// Called once every index entry for this file has been published
    pub fn mark_available_for_merge(&self) {
        self.available_for_merge.store(true, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Retire the file: later reads return `None` and the file is unlinked
    pub(crate) fn delete(&self) -> Result<()> {
        self.deleted.store(true, Ordering::Release);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_metadata_from(file: &mut File, path: &Path, size: u64) -> Result<DataFileMetadata> {
    if size < HEADER_SIZE {
        return Err(VirtDbError::Corruption(format!(
            "data file {} is shorter than its header ({} bytes)",
            path.display(),
            size
        )));
    }
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;
    DataFileMetadata::decode(&header, path)
}
