//! `sharekit_io_fs` v1:
//! Cancellable, progress-observable directory tree copy.
//!
//! Modules:
//! - `copy`     : copy task lifecycle and orchestration
//! - `scan`     : single-pass source inventory
//! - `progress` : progress snapshots
//! - `spec`     : enums/options/errors
//! - `report`   : run-time report model
//! - `util`     : shared helper functions

pub mod copy;
pub mod progress;
pub mod report;
pub mod scan;
pub mod spec;
mod util;

pub use copy::{CopyTask, copy_tree};
pub use progress::{SpecCopyProgress, SpecCurrentCopy, calculate_percentage, compute_progress};
pub use report::{ReportCopy, ReportCopyBuilder};
pub use scan::{SpecDirEntry, SpecFileEntry, SpecInventory, TreeScanner};
pub use spec::{
    CopyError, EnumCopyFileConflictStrategy, EnumCopyOutcome, EnumCopyPatternMode,
    EnumCopyState, ScanError, SpecCopyOptions,
};
