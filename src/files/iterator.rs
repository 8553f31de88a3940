//! Data File Iterator
//!
//! Sequential iteration over all items of a data file.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{Result, VirtDbError};

use super::{FRAME_HEADER_SIZE, HEADER_SIZE};

/// Iterator over the items of a data file in write order.
///
/// Owns its own file handle so iteration never contends with random reads.
pub struct DataFileIterator {
    path: PathBuf,
    reader: BufReader<File>,
    current_offset: u64,
    file_size: u64,
    remaining: u64,
}

impl DataFileIterator {
    pub(super) fn open(path: &Path, item_count: u64, file_size: u64) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            current_offset: HEADER_SIZE,
            file_size,
            remaining: item_count,
        })
    }

    fn read_next(&mut self) -> Result<(u64, Bytes)> {
        let offset = self.current_offset;

        let mut frame = [0u8; FRAME_HEADER_SIZE as usize];
        self.reader.read_exact(&mut frame)?;
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as u64;
        let crc = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        if offset + FRAME_HEADER_SIZE + len > self.file_size {
            return Err(VirtDbError::Corruption(format!(
                "item at offset {} in {} runs past the end of the file",
                offset,
                self.path.display()
            )));
        }

        let mut item = vec![0u8; len as usize];
        self.reader.read_exact(&mut item)?;
        if crc32fast::hash(&item) != crc {
            return Err(VirtDbError::Corruption(format!(
                "checksum mismatch for item at offset {} in {}",
                offset,
                self.path.display()
            )));
        }

        self.current_offset += FRAME_HEADER_SIZE + len;
        Ok((offset, Bytes::from(item)))
    }
}

impl Iterator for DataFileIterator {
    /// (byte offset of the item frame, item bytes)
    type Item = Result<(u64, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.read_next() {
            Ok(item) => {
                self.remaining -= 1;
                Some(Ok(item))
            }
            Err(e) => {
                // Stop after the first error
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
