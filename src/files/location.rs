//! Data locations
//!
//! A data location packs a file index and a byte offset into one `u64` so it
//! fits in a single long list slot.
//!
//! ```text
//! bit 63            40 39                         0
//!    ┌────────────────┬────────────────────────────┐
//!    │ file index + 1 │        byte offset         │
//!    └────────────────┴────────────────────────────┘
//! ```
//!
//! The `+ 1` keeps every real location non-zero, so `0` can mean "absent".

/// Location value meaning "no data"
pub const NON_EXISTENT_DATA_LOCATION: u64 = 0;

const OFFSET_BITS: u32 = 40;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Largest byte offset a location can address
pub const MAX_BYTE_OFFSET: u64 = OFFSET_MASK;

/// Largest file index a location can address
pub const MAX_FILE_INDEX: u32 = (1 << (64 - OFFSET_BITS)) - 2;

pub fn data_location(file_index: u32, byte_offset: u64) -> u64 {
    ((file_index as u64 + 1) << OFFSET_BITS) | (byte_offset & OFFSET_MASK)
}

/// File index of a location, `None` for the absent location
pub fn file_index(location: u64) -> Option<u32> {
    (location >> OFFSET_BITS).checked_sub(1).map(|i| i as u32)
}

pub fn byte_offset(location: u64) -> u64 {
    location & OFFSET_MASK
}

/// Human readable form for logs and errors
pub fn describe(location: u64) -> String {
    match file_index(location) {
        Some(index) => format!("file {} offset {}", index, byte_offset(location)),
        None => "<absent>".to_string(),
    }
}
