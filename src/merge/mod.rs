//! Merge/Compaction
//!
//! - [`MergePlanner`]: picks the full / medium / small tier on each wake-up
//! - [`MergeScheduler`]: the background thread that drives a [`Compactable`]

mod planner;
mod scheduler;

pub use planner::{MergeKind, MergePlanner};
pub use scheduler::{Compactable, MergeScheduler};
