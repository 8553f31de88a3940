//! Half-disk hash map for `key -> path` lookups of non-numeric keys

mod bucket;
mod map;

pub use bucket::{Bucket, BucketEntry, BucketSerializer};
pub use map::{bucket_count_for, HalfDiskHashMap, GOOD_AVERAGE_BUCKET_ENTRY_COUNT};
