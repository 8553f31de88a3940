//! Merge tier selection

use std::time::Instant;

use crate::config::MergeConfig;
use crate::files::MergeFilter;

/// The three merge tiers, in increasing scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Newest files below the small cutoff
    Small,
    /// Newest files below the medium cutoff
    Medium,
    /// Every file
    Full,
}

impl MergeKind {
    /// File filter for this tier
    pub fn filter(&self, config: &MergeConfig) -> MergeFilter {
        match self {
            MergeKind::Full => MergeFilter::All,
            MergeKind::Medium => MergeFilter::NewestSmallerThan {
                cutoff_bytes: config.medium_merge_cutoff_bytes,
                max_files: config.max_files_in_merge,
            },
            MergeKind::Small => MergeFilter::NewestSmallerThan {
                cutoff_bytes: config.small_merge_cutoff_bytes,
                max_files: config.max_files_in_merge,
            },
        }
    }
}

/// Decides which tier runs on each wake-up.
///
/// Full wins over medium, medium over small; only one fires per wake-up.
#[derive(Debug, Clone)]
pub struct MergePlanner {
    config: MergeConfig,
    last_full_merge: Instant,
    last_medium_merge: Instant,
}

impl MergePlanner {
    /// Both timers start at `now`, so the first full merge comes one full
    /// period after startup
    pub fn new(config: &MergeConfig, now: Instant) -> Self {
        Self {
            config: config.clone(),
            last_full_merge: now,
            last_medium_merge: now,
        }
    }

    pub fn next_merge(&mut self, now: Instant) -> MergeKind {
        if now.saturating_duration_since(self.last_full_merge) >= self.config.full_merge_period {
            self.last_full_merge = now;
            MergeKind::Full
        } else if now.saturating_duration_since(self.last_medium_merge)
            >= self.config.medium_merge_period
        {
            self.last_medium_merge = now;
            MergeKind::Medium
        } else {
            MergeKind::Small
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }
}
