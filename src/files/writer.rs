//! Data File Writer
//!
//! Appends framed items to a new data file, then seals it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, VirtDbError};

use super::location::MAX_BYTE_OFFSET;
use super::{DataFileMetadata, FRAME_HEADER_SIZE, HEADER_SIZE};

/// Writer for a single data file. Only one thread ever writes to a file.
pub(crate) struct DataFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    metadata: DataFileMetadata,
    /// Offset the next item frame will be written at
    current_offset: u64,
}

impl DataFileWriter {
    /// Create the file and write a placeholder header
    pub(crate) fn create(path: &Path, index: u32, creation_ms: u64, data_version: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        let metadata = DataFileMetadata {
            index,
            creation_ms,
            data_version,
            item_count: 0,
            min_key: u64::MAX,
            max_key: 0,
            completed: false,
        };
        writer.write_all(&metadata.encode())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            metadata,
            current_offset: HEADER_SIZE,
        })
    }

    /// Append one item, returning the byte offset of its frame
    pub(crate) fn write_item(&mut self, key: u64, item: &[u8]) -> Result<u64> {
        let len = u32::try_from(item.len()).map_err(|_| {
            VirtDbError::IllegalArgument(format!("data item of {} bytes is too large", item.len()))
        })?;
        let offset = self.current_offset;
        if offset > MAX_BYTE_OFFSET {
            return Err(VirtDbError::IllegalState(format!(
                "data file {} exceeds the addressable size",
                self.path.display()
            )));
        }

        let crc = crc32fast::hash(item);
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(item)?;

        self.current_offset += FRAME_HEADER_SIZE + item.len() as u64;
        self.metadata.item_count += 1;
        self.metadata.min_key = self.metadata.min_key.min(key);
        self.metadata.max_key = self.metadata.max_key.max(key);
        Ok(offset)
    }

    pub(crate) fn index(&self) -> u32 {
        self.metadata.index
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn item_count(&self) -> u64 {
        self.metadata.item_count
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.current_offset
    }

    /// Flush, patch the header and fsync. Returns the final header.
    pub(crate) fn finish(mut self) -> Result<DataFileMetadata> {
        self.writer.flush()?;

        if self.metadata.item_count == 0 {
            self.metadata.min_key = 0;
        }
        self.metadata.completed = true;

        // Seek back and rewrite the header with the final counts
        let mut file = self.writer.into_inner().map_err(|e| {
            VirtDbError::Io(std::io::Error::new(
                e.error().kind(),
                format!("failed to flush {}: {}", self.path.display(), e.error()),
            ))
        })?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.metadata.encode())?;
        file.sync_all()?;

        Ok(self.metadata)
    }
}
