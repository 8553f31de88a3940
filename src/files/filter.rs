//! Merge file selection

use std::sync::Arc;

use super::DataFileReader;

/// Which mergeable files a merge takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeFilter {
    /// Every file that is available for merging
    All,
    /// The newest run of files that are each smaller than `cutoff_bytes`,
    /// at most `max_files` of them
    NewestSmallerThan { cutoff_bytes: u64, max_files: usize },
}

impl MergeFilter {
    /// Apply the filter to files ordered oldest to newest. The result keeps
    /// that order and is always a contiguous run ending at the newest file, so
    /// merged output never jumps ahead of a newer file left out of the merge.
    pub fn select(&self, files: Vec<Arc<DataFileReader>>) -> Vec<Arc<DataFileReader>> {
        match *self {
            MergeFilter::All => files,
            MergeFilter::NewestSmallerThan {
                cutoff_bytes,
                max_files,
            } => {
                let mut selected: Vec<_> = files
                    .into_iter()
                    .rev()
                    .take_while(|f| f.size() < cutoff_bytes)
                    .take(max_files)
                    .collect();
                selected.reverse();
                selected
            }
        }
    }
}
