//! Batch argument checks, run before any I/O

use crate::error::{Result, VirtDbError};
use crate::records::{InternalRecord, INVALID_PATH};

/// `(INVALID_PATH, INVALID_PATH)` is the empty tree; otherwise
/// `0 <= first <= last < max_paths`
pub(crate) fn validate_leaf_path_range(first_leaf_path: i64, last_leaf_path: i64, max_paths: u64) -> Result<()> {
    if first_leaf_path == INVALID_PATH && last_leaf_path == INVALID_PATH {
        return Ok(());
    }
    if first_leaf_path < 0 || last_leaf_path < first_leaf_path {
        return Err(VirtDbError::IllegalArgument(format!(
            "invalid leaf path range [{}, {}]",
            first_leaf_path, last_leaf_path
        )));
    }
    if last_leaf_path as u64 >= max_paths {
        return Err(VirtDbError::IllegalArgument(format!(
            "last leaf path {} exceeds the configured maximum of {} paths",
            last_leaf_path, max_paths
        )));
    }
    Ok(())
}

/// Internal records must be strictly ascending and below the first leaf
pub(crate) fn validate_internal_records(first_leaf_path: i64, records: &[InternalRecord]) -> Result<()> {
    let mut previous: Option<i64> = None;
    for record in records {
        if record.path < 0 {
            return Err(VirtDbError::IllegalArgument(format!(
                "internal record has negative path {}",
                record.path
            )));
        }
        if record.path >= first_leaf_path {
            return Err(VirtDbError::IllegalArgument(format!(
                "internal record path {} is not below the first leaf path {}",
                record.path, first_leaf_path
            )));
        }
        check_ascending(&mut previous, record.path)?;
    }
    Ok(())
}

/// Leaf paths must be unique and inside the leaf range. Batches may be
/// ordered by key rather than by path, so order is not checked.
pub(crate) fn validate_leaf_paths<I>(first_leaf_path: i64, last_leaf_path: i64, paths: I) -> Result<()>
where
    I: IntoIterator<Item = i64>,
{
    let mut seen: Vec<i64> = Vec::new();
    let mut ascending = true;
    for path in paths {
        if path < first_leaf_path || path > last_leaf_path || path < 0 {
            return Err(VirtDbError::IllegalArgument(format!(
                "leaf record path {} is outside the leaf range [{}, {}]",
                path, first_leaf_path, last_leaf_path
            )));
        }
        ascending &= seen.last().map_or(true, |&prev| path > prev);
        seen.push(path);
    }
    if !ascending {
        seen.sort_unstable();
    }
    if let Some(pair) = seen.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(VirtDbError::IllegalArgument(format!(
            "leaf path {} appears more than once in one batch",
            pair[0]
        )));
    }
    Ok(())
}

fn check_ascending(previous: &mut Option<i64>, path: i64) -> Result<()> {
    if let Some(prev) = *previous {
        if path <= prev {
            return Err(VirtDbError::IllegalArgument(format!(
                "internal records must be sorted by path with no duplicates: {} follows {}",
                path, prev
            )));
        }
    }
    *previous = Some(path);
    Ok(())
}
