//! Long List
//!
//! A dense `u64 -> u64` array, split into lazily allocated chunks of atomics.
//!
//! ```text
//!  index ─► chunk = index / longs_per_chunk ─► slot = index % longs_per_chunk
//!
//!  chunks: [ Some ] [ None ] [ Some ] ...
//!             │                 │
//!             ▼                 ▼
//!         [AtomicU64; n]    [AtomicU64; n]
//! ```
//!
//! `0` is reserved as "absent": it can be read back as a default but never
//! stored. Every slot update is a single atomic store, so one writer and any
//! number of readers can share a list without locking.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                        │
//! │   Version: u32 | LongsPerChunk: u32 | MaxLongs: u64      │
//! │   Size: u64                                              │
//! ├──────────────────────────────────────────────────────────┤
//! │ Size x u64 (little endian)                               │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::error::{Result, VirtDbError};

/// The value that marks an empty slot
pub const IMPERMISSIBLE_VALUE: u64 = 0;

const FILE_FORMAT_VERSION: u32 = 1;
const FILE_HEADER_SIZE: usize = 24;

/// Chunked, lock-free list of longs
pub struct LongList {
    longs_per_chunk: usize,
    max_longs: u64,
    chunks: Box<[OnceLock<Box<[AtomicU64]>>]>,
    /// One past the highest index ever written
    size: AtomicU64,
}

impl LongList {
    /// Create an empty list that can hold indices `0..max_longs`
    pub fn new(longs_per_chunk: usize, max_longs: u64) -> Self {
        let longs_per_chunk = longs_per_chunk.max(1);
        let num_chunks = max_longs.div_ceil(longs_per_chunk as u64) as usize;
        let chunks = (0..num_chunks).map(|_| OnceLock::new()).collect::<Vec<_>>();
        Self {
            longs_per_chunk,
            max_longs,
            chunks: chunks.into_boxed_slice(),
            size: AtomicU64::new(0),
        }
    }

    /// Value at `index`, or `default` when the slot is empty or out of bounds
    pub fn get(&self, index: u64, default: u64) -> u64 {
        match self.slot(index) {
            Some(slot) => match slot.load(Ordering::Acquire) {
                IMPERMISSIBLE_VALUE => default,
                value => value,
            },
            None => default,
        }
    }

    /// Store `value` at `index`
    pub fn put(&self, index: u64, value: u64) -> Result<()> {
        if value == IMPERMISSIBLE_VALUE {
            return Err(VirtDbError::IllegalArgument(format!(
                "cannot store {} in a long list, use remove()",
                IMPERMISSIBLE_VALUE
            )));
        }
        self.slot_for_write(index)?.store(value, Ordering::Release);
        self.size.fetch_max(index + 1, Ordering::AcqRel);
        Ok(())
    }

    /// Atomically replace `old` with `new` at `index`.
    ///
    /// Returns false if the slot no longer holds `old`. Merges use this so a
    /// location written by a newer batch is never overwritten with a stale one.
    pub fn put_if_equal(&self, index: u64, old: u64, new: u64) -> Result<bool> {
        if new == IMPERMISSIBLE_VALUE {
            return Err(VirtDbError::IllegalArgument(format!(
                "cannot store {} in a long list",
                IMPERMISSIBLE_VALUE
            )));
        }
        let slot = match self.slot(index) {
            Some(slot) => slot,
            None => return Ok(false),
        };
        Ok(slot
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    /// Clear the slot at `index` only if it still holds `old`
    pub fn remove_if_equal(&self, index: u64, old: u64) -> bool {
        match self.slot(index) {
            Some(slot) => slot
                .compare_exchange(old, IMPERMISSIBLE_VALUE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            None => false,
        }
    }

    /// Clear the slot at `index`, returning the previous value (0 if none)
    pub fn remove(&self, index: u64) -> u64 {
        match self.slot(index) {
            Some(slot) => slot.swap(IMPERMISSIBLE_VALUE, Ordering::AcqRel),
            None => IMPERMISSIBLE_VALUE,
        }
    }

    /// One past the highest index ever written
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u64 {
        self.max_longs
    }

    pub fn longs_per_chunk(&self) -> usize {
        self.longs_per_chunk
    }

    /// Visit every non-empty slot in index order
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, u64) -> Result<()>,
    {
        let size = self.size();
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            let Some(chunk) = chunk.get() else { continue };
            let base = (chunk_index * self.longs_per_chunk) as u64;
            for (offset, slot) in chunk.iter().enumerate() {
                let index = base + offset as u64;
                if index >= size {
                    return Ok(());
                }
                let value = slot.load(Ordering::Acquire);
                if value != IMPERMISSIBLE_VALUE {
                    f(index, value)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the list to `path`, replacing any existing file
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("ll.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        let size = self.size();
        writer.write_all(&FILE_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.longs_per_chunk as u32).to_le_bytes())?;
        writer.write_all(&self.max_longs.to_le_bytes())?;
        writer.write_all(&size.to_le_bytes())?;
        for index in 0..size {
            writer.write_all(&self.get(index, IMPERMISSIBLE_VALUE).to_le_bytes())?;
        }
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| VirtDbError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load a list previously written by `write_to_file`
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let version = read_u32(&header[0..4]);
        if version != FILE_FORMAT_VERSION {
            return Err(VirtDbError::Corruption(format!(
                "unsupported long list file version {} in {}",
                version,
                path.display()
            )));
        }
        let longs_per_chunk = read_u32(&header[4..8]) as usize;
        let max_longs = read_u64(&header[8..16]);
        let size = read_u64(&header[16..24]);
        if size > max_longs || longs_per_chunk == 0 {
            return Err(VirtDbError::Corruption(format!(
                "long list header in {} is inconsistent: size {} max {} chunk {}",
                path.display(),
                size,
                max_longs,
                longs_per_chunk
            )));
        }

        let list = Self::new(longs_per_chunk, max_longs);
        let mut value = [0u8; 8];
        for index in 0..size {
            reader.read_exact(&mut value)?;
            let value = u64::from_le_bytes(value);
            if value != IMPERMISSIBLE_VALUE {
                list.put(index, value)?;
            }
        }
        Ok(list)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn slot(&self, index: u64) -> Option<&AtomicU64> {
        if index >= self.max_longs {
            return None;
        }
        let chunk = self.chunks[(index / self.longs_per_chunk as u64) as usize].get()?;
        Some(&chunk[(index % self.longs_per_chunk as u64) as usize])
    }

    fn slot_for_write(&self, index: u64) -> Result<&AtomicU64> {
        if index >= self.max_longs {
            return Err(VirtDbError::IllegalArgument(format!(
                "index {} is beyond long list capacity {}",
                index, self.max_longs
            )));
        }
        let per_chunk = self.longs_per_chunk;
        let chunk = self.chunks[(index / per_chunk as u64) as usize].get_or_init(|| {
            (0..per_chunk)
                .map(|_| AtomicU64::new(IMPERMISSIBLE_VALUE))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });
        Ok(&chunk[(index % per_chunk as u64) as usize])
    }
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
