//! Hash List
//!
//! Dense in-memory `path -> Hash` storage for the upper levels of the tree.
//! Chunks are allocated on first write and each has its own lock.
//!
//! ## File Format
//! ```text
//! Header (24 bytes): Version u32 | HashesPerChunk u32 | MaxHashes u64 | Size u64
//! Size x [present u8][hash 48 bytes if present]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, VirtDbError};
use crate::hash::{Hash, HASH_SIZE};

use super::long_list::{read_u32, read_u64};

const FILE_FORMAT_VERSION: u32 = 1;
const FILE_HEADER_SIZE: usize = 24;

type Chunk = Box<[Option<Hash>]>;

/// Chunked list of hashes indexed by path
pub struct HashList {
    hashes_per_chunk: usize,
    max_hashes: u64,
    chunks: Box<[RwLock<Option<Chunk>>]>,
    size: AtomicU64,
}

impl HashList {
    pub fn new(hashes_per_chunk: usize, max_hashes: u64) -> Self {
        let hashes_per_chunk = hashes_per_chunk.max(1);
        let num_chunks = max_hashes.div_ceil(hashes_per_chunk as u64) as usize;
        let chunks = (0..num_chunks).map(|_| RwLock::new(None)).collect::<Vec<_>>();
        Self {
            hashes_per_chunk,
            max_hashes,
            chunks: chunks.into_boxed_slice(),
            size: AtomicU64::new(0),
        }
    }

    pub fn get(&self, index: u64) -> Option<Hash> {
        if index >= self.max_hashes {
            return None;
        }
        let (chunk, slot) = self.position(index);
        self.chunks[chunk].read().as_ref().and_then(|c| c[slot])
    }

    pub fn put(&self, index: u64, hash: Hash) -> Result<()> {
        if index >= self.max_hashes {
            return Err(VirtDbError::IllegalArgument(format!(
                "index {} is beyond hash list capacity {}",
                index, self.max_hashes
            )));
        }
        let (chunk, slot) = self.position(index);
        let mut guard = self.chunks[chunk].write();
        let chunk = guard.get_or_insert_with(|| vec![None; self.hashes_per_chunk].into_boxed_slice());
        chunk[slot] = Some(hash);
        drop(guard);
        self.size.fetch_max(index + 1, Ordering::AcqRel);
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u64 {
        self.max_hashes
    }

    /// Write the list to `path`, replacing any existing file
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("hl.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        let size = self.size();
        writer.write_all(&FILE_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.hashes_per_chunk as u32).to_le_bytes())?;
        writer.write_all(&self.max_hashes.to_le_bytes())?;
        writer.write_all(&size.to_le_bytes())?;
        for index in 0..size {
            match self.get(index) {
                Some(hash) => {
                    writer.write_all(&[1])?;
                    writer.write_all(hash.as_bytes())?;
                }
                None => writer.write_all(&[0])?,
            }
        }
        writer.flush()?;

        let file = writer
            .into_inner()
            .map_err(|e| VirtDbError::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; FILE_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let version = read_u32(&header[0..4]);
        if version != FILE_FORMAT_VERSION {
            return Err(VirtDbError::Corruption(format!(
                "unsupported hash list file version {} in {}",
                version,
                path.display()
            )));
        }
        let hashes_per_chunk = read_u32(&header[4..8]) as usize;
        let max_hashes = read_u64(&header[8..16]);
        let size = read_u64(&header[16..24]);
        if size > max_hashes {
            return Err(VirtDbError::Corruption(format!(
                "hash list in {} holds {} hashes but capacity is {}",
                path.display(),
                size,
                max_hashes
            )));
        }

        let list = Self::new(hashes_per_chunk, max_hashes);
        let mut present = [0u8; 1];
        let mut hash = [0u8; HASH_SIZE];
        for index in 0..size {
            reader.read_exact(&mut present)?;
            match present[0] {
                0 => {}
                1 => {
                    reader.read_exact(&mut hash)?;
                    list.put(index, Hash::new(hash))?;
                }
                other => {
                    return Err(VirtDbError::Corruption(format!(
                        "bad presence marker {} at index {} in {}",
                        other,
                        index,
                        path.display()
                    )));
                }
            }
        }
        Ok(list)
    }

    fn position(&self, index: u64) -> (usize, usize) {
        let per_chunk = self.hashes_per_chunk as u64;
        ((index / per_chunk) as usize, (index % per_chunk) as usize)
    }
}
