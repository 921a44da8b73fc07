//! Copy options, lifecycle states and error types.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::report::ReportCopy;

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Pattern matching mode for the ignore list.
///
/// Every mode is applied to the entry base name, never to the full path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCopyPatternMode {
    /// Exact base name match.
    #[default]
    Literal,
    /// Shell-like wildcards (`*`, `?`, character classes).
    Glob,
    /// Regular expression pattern.
    Regex,
}

/// Existing destination file policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCopyFileConflictStrategy {
    /// Replace destination file with source file.
    #[default]
    Overwrite,
    /// Keep a destination file whose size and mtime equal the source.
    ///
    /// Re-running an interrupted copy with this policy resumes it: files that
    /// already landed are counted as copied without rewriting them.
    SkipIdentical,
    /// Fail the task when a destination file already exists.
    Error,
}

/// Lifecycle of one copy task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCopyState {
    /// Created, `run` not called yet.
    Pending,
    /// Walking the source tree.
    Scanning,
    /// Creating directories and copying files.
    Copying,
    /// Every entry landed and directory metadata was restored.
    Completed,
    /// Stopped at a checkpoint after `cancel`.
    Cancelled,
    /// Aborted by the first error.
    Failed,
}

impl EnumCopyState {
    /// `true` for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for EnumCopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Scanning => "scanning",
            Self::Copying => "copying",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Input options for a copy task.
#[derive(Debug, Clone)]
pub struct SpecCopyOptions {
    /// Base names (or patterns, see `rule_pattern`) excluded from the copy.
    ///
    /// A matching directory is pruned together with its whole subtree.
    pub names_ignore: Vec<String>,
    /// Pattern interpretation mode for `names_ignore`.
    pub rule_pattern: EnumCopyPatternMode,
    /// Behavior for files already present at destination.
    pub rule_conflict_file: EnumCopyFileConflictStrategy,
    /// Copy uid/gid. Failures caused by missing privileges are tolerated.
    pub if_preserve_ownership: bool,
    /// Copy extended attributes (Linux only).
    pub if_preserve_xattrs: bool,
}

impl Default for SpecCopyOptions {
    fn default() -> Self {
        Self {
            names_ignore: Vec::new(),
            rule_pattern: EnumCopyPatternMode::Literal,
            rule_conflict_file: EnumCopyFileConflictStrategy::Overwrite,
            if_preserve_ownership: true,
            if_preserve_xattrs: true,
        }
    }
}

/// Source tree walk failures. A failed scan never yields a partial inventory.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Source root is missing or not a directory.
    #[error("Source is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),
    /// Invalid ignore pattern.
    #[error("Invalid pattern in ignore list: {0}")]
    InvalidPattern(String),
    /// Directory listing failed.
    #[error("Failed to read directory {} ({source})", .path.display())]
    ReadDir {
        /// Directory that could not be listed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Entry metadata lookup failed.
    #[error("Failed to inspect {} ({source})", .path.display())]
    Stat {
        /// Entry that could not be inspected.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Failures that abort a copy task as `Failed`.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Source tree could not be scanned.
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// Source and destination overlap (`src` contains `dst` or vice versa).
    #[error(
        "Source and destination directories overlap: {} <-> {}",
        .path_src.display(),
        .path_dst.display()
    )]
    SourceDestinationOverlap {
        /// Normalized source directory.
        path_src: PathBuf,
        /// Normalized destination directory.
        path_dst: PathBuf,
    },
    /// Destination root could not be created.
    #[error("Failed to initialize destination {} ({source})", .path.display())]
    DestinationInit {
        /// Destination root.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Destination path would leave the destination root.
    #[error("{0}")]
    UnsafeDestination(String),
    /// Destination directory creation failed.
    #[error("Failed to create directory {} ({source})", .path.display())]
    CreateDir {
        /// Destination directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// File content or metadata copy failed.
    #[error(
        "Failed to copy {} -> {} ({source})",
        .path_src.display(),
        .path_dst.display()
    )]
    CopyFile {
        /// Source file.
        path_src: PathBuf,
        /// Destination file.
        path_dst: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Directory metadata restore failed.
    #[error("Failed to apply metadata to {} ({source})", .path.display())]
    Metadata {
        /// Destination directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Destination file exists and the conflict policy is `Error`.
    #[error("Destination exists: {}", .0.display())]
    DestinationExists(PathBuf),
    /// `run` was called on a task that already left `Pending`.
    #[error("Copy task was already started")]
    AlreadyStarted,
}

/// Terminal result of one copy run.
#[derive(Debug)]
pub enum EnumCopyOutcome {
    /// Every entry was copied.
    Completed(ReportCopy),
    /// A cancellation checkpoint observed the cancel flag.
    Cancelled,
    /// The first error aborted the task.
    Failed(CopyError),
}

impl EnumCopyOutcome {
    /// Lifecycle state matching this outcome.
    pub fn state(&self) -> EnumCopyState {
        match self {
            Self::Completed(_) => EnumCopyState::Completed,
            Self::Cancelled => EnumCopyState::Cancelled,
            Self::Failed(_) => EnumCopyState::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
