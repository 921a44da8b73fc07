//! Progress snapshots derived from copy task counters.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// File currently being copied: destination path and expected size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCurrentCopy {
    pub path_file: PathBuf,
    pub size: u64,
}

/// Point-in-time progress of one copy task.
///
/// Serialises to `{"total_progress": 100}` when no file is current, otherwise
/// also carries `current_file_path` and `current_file_progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecCopyProgress {
    /// Overall percentage, `0..=100`.
    pub total_progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_progress: Option<u8>,
}

impl SpecCopyProgress {
    pub fn finished() -> Self {
        Self {
            total_progress: 100,
            current_file_path: None,
            current_file_progress: None,
        }
    }
}

/// Floor of `n_current * 100 / n_total`, clamped to 100. A zero total gives 0.
pub fn calculate_percentage(n_current: u64, n_total: u64) -> u8 {
    if n_total == 0 {
        return 0;
    }
    let n_percent = (n_current as u128 * 100) / n_total as u128;
    n_percent.min(100) as u8
}

/// Pure progress computation.
///
/// `n_size_observed` is the on-disk size of the current destination file; the
/// caller passes 0 when it cannot be read.
pub fn compute_progress(
    n_bytes_copied: u64,
    n_bytes_total: u64,
    current_copy: Option<&SpecCurrentCopy>,
    n_size_observed: u64,
) -> SpecCopyProgress {
    let Some(current_copy) = current_copy else {
        return SpecCopyProgress::finished();
    };

    SpecCopyProgress {
        total_progress: calculate_percentage(n_bytes_copied, n_bytes_total),
        current_file_path: Some(current_copy.path_file.clone()),
        current_file_progress: Some(calculate_percentage(n_size_observed, current_copy.size)),
    }
}

/// Size of `path_file` on disk, or 0 when it vanished or does not exist yet.
pub(crate) fn observe_file_size(path_file: &Path) -> u64 {
    fs::metadata(path_file).map(|m| m.len()).unwrap_or(0)
}
