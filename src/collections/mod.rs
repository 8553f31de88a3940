//! In-memory index structures
//!
//! - [`LongList`]: dense `u64 -> u64` slots, used for every `key -> data location`
//!   index and for the long key mode `key -> path` index
//! - [`HashList`]: dense `path -> Hash` slots for the RAM tier of the hash store

mod hash_list;
mod long_list;

pub use hash_list::HashList;
pub use long_list::{LongList, IMPERMISSIBLE_VALUE};
