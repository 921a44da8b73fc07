//! Cancellable, progress-observable tree copy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::progress::{SpecCopyProgress, SpecCurrentCopy, compute_progress, observe_file_size};
use crate::report::{ReportCopy, ReportCopyBuilder};
use crate::scan::{SpecDirEntry, SpecFileEntry, SpecInventory, TreeScanner};
use crate::spec::{
    CopyError, EnumCopyFileConflictStrategy, EnumCopyOutcome, EnumCopyState, ScanError,
    SpecCopyOptions,
};
use crate::util::{
    apply_dir_metadata, copy_file_with_metadata, create_symbolic_link, derive_destination_path,
    derive_partial_path, is_identical_file, is_overlap, set_mode,
    validate_destination_path_safety,
};

/// Mode given to freshly created destination directories until their own
/// metadata is restored at the end of the run.
const N_MODE_DIR_WRITABLE: u32 = 0o777;

enum EnumRunExit {
    Done(ReportCopy),
    Cancelled,
}

/// Current entry plus the path whose size tracks its bytes on disk.
#[derive(Debug, Clone)]
struct SpecCopyInFlight {
    spec_current: SpecCurrentCopy,
    /// Hidden partial sibling while a regular file is written, then the final path.
    path_file_written: PathBuf,
}

#[cfg(test)]
type FileStartHook = Box<dyn Fn(&CopyTask) + Send + Sync>;

/// One tree copy from `path_dir_src` into `path_dir_dst`.
///
/// Only the thread inside [`CopyTask::run`] mutates the counters; any other
/// thread may call [`CopyTask::get_progress`] or [`CopyTask::cancel`] at any
/// time through a shared `Arc<CopyTask>`.
pub struct CopyTask {
    path_dir_src: PathBuf,
    path_dir_dst: PathBuf,
    spec_cp_options: SpecCopyOptions,
    n_bytes_copied: AtomicU64,
    n_bytes_total: AtomicU64,
    current_copy: RwLock<Option<SpecCopyInFlight>>,
    flag_cancel: Arc<AtomicBool>,
    state: Mutex<EnumCopyState>,
    #[cfg(test)]
    hook_file_started: Mutex<Option<FileStartHook>>,
}

impl std::fmt::Debug for CopyTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTask")
            .field("path_dir_src", &self.path_dir_src)
            .field("path_dir_dst", &self.path_dir_dst)
            .field("spec_cp_options", &self.spec_cp_options)
            .field("n_bytes_copied", &self.n_bytes_copied)
            .field("n_bytes_total", &self.n_bytes_total)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CopyTask {
    pub fn new<P, Q>(dir_source: P, dir_destination: Q, spec_cp_options: SpecCopyOptions) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            path_dir_src: dir_source.as_ref().to_path_buf(),
            path_dir_dst: dir_destination.as_ref().to_path_buf(),
            spec_cp_options,
            n_bytes_copied: AtomicU64::new(0),
            n_bytes_total: AtomicU64::new(0),
            current_copy: RwLock::new(None),
            flag_cancel: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(EnumCopyState::Pending),
            #[cfg(test)]
            hook_file_started: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn on_file_started<F>(&self, hook: F)
    where
        F: Fn(&CopyTask) + Send + Sync + 'static,
    {
        *self.hook_file_started.lock() = Some(Box::new(hook));
    }

    #[cfg(test)]
    fn fire_file_started(&self) {
        if let Some(hook) = self.hook_file_started.lock().as_ref() {
            hook(self);
        }
    }

    #[cfg(not(test))]
    #[inline]
    fn fire_file_started(&self) {}

    pub fn path_src(&self) -> &Path {
        &self.path_dir_src
    }

    pub fn path_dst(&self) -> &Path {
        &self.path_dir_dst
    }

    pub fn state(&self) -> EnumCopyState {
        *self.state.lock()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.n_bytes_copied.load(Ordering::Acquire)
    }

    pub fn bytes_total(&self) -> u64 {
        self.n_bytes_total.load(Ordering::Acquire)
    }

    /// Request a stop at the next checkpoint. Idempotent, never blocks.
    ///
    /// A single file already being copied is finished first.
    pub fn cancel(&self) {
        if !self.flag_cancel.swap(true, Ordering::AcqRel) {
            debug!(src = %self.path_dir_src.display(), state = %self.state(), "cancel requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag_cancel.load(Ordering::Acquire)
    }

    /// Snapshot of the task counters; see [`compute_progress`].
    pub fn get_progress(&self) -> SpecCopyProgress {
        let current_copy = self.current_copy.read().clone();
        let n_size_observed = current_copy
            .as_ref()
            .map(|c| observe_file_size(&c.path_file_written))
            .unwrap_or(0);
        compute_progress(
            self.bytes_copied(),
            self.bytes_total(),
            current_copy.as_ref().map(|c| &c.spec_current),
            n_size_observed,
        )
    }

    /// Scan the source, create directories, copy files, restore directory metadata.
    ///
    /// Cancellation is checked before each directory, before each file and
    /// before the final metadata pass. The first error aborts the run.
    pub fn run(&self) -> EnumCopyOutcome {
        {
            let mut state = self.state.lock();
            if *state != EnumCopyState::Pending {
                return EnumCopyOutcome::Failed(CopyError::AlreadyStarted);
            }
            *state = EnumCopyState::Scanning;
        }
        info!(
            src = %self.path_dir_src.display(),
            dst = %self.path_dir_dst.display(),
            "copy started"
        );

        let outcome = match self.execute() {
            Ok(EnumRunExit::Done(report)) => EnumCopyOutcome::Completed(report),
            Ok(EnumRunExit::Cancelled) => EnumCopyOutcome::Cancelled,
            Err(e) => EnumCopyOutcome::Failed(e),
        };
        *self.state.lock() = outcome.state();

        match &outcome {
            EnumCopyOutcome::Completed(report) => info!(src = %self.path_dir_src.display(), "{report}"),
            EnumCopyOutcome::Cancelled => warn!(
                src = %self.path_dir_src.display(),
                bytes_copied = self.bytes_copied(),
                "copy cancelled"
            ),
            EnumCopyOutcome::Failed(e) => warn!(src = %self.path_dir_src.display(), "copy failed: {e}"),
        }
        outcome
    }

    fn execute(&self) -> Result<EnumRunExit, CopyError> {
        let path_dir_src = &self.path_dir_src;
        let path_dir_dst = &self.path_dir_dst;

        if !path_dir_src.is_dir() {
            return Err(ScanError::SourceNotDirectory(path_dir_src.clone()).into());
        }
        if is_overlap(path_dir_src, path_dir_dst) {
            return Err(CopyError::SourceDestinationOverlap {
                path_src: path_dir_src.clone(),
                path_dst: path_dir_dst.clone(),
            });
        }
        fs::create_dir_all(path_dir_dst).map_err(|e| CopyError::DestinationInit {
            path: path_dir_dst.clone(),
            source: e,
        })?;

        let spec_inventory = TreeScanner::new(
            &self.spec_cp_options.names_ignore,
            self.spec_cp_options.rule_pattern,
        )?
        .with_cancel_flag(Arc::clone(&self.flag_cancel))
        .scan(path_dir_src)?;
        self.n_bytes_total
            .store(spec_inventory.n_bytes_total, Ordering::Release);
        if spec_inventory.if_interrupted || self.is_cancelled() {
            return Ok(EnumRunExit::Cancelled);
        }

        *self.state.lock() = EnumCopyState::Copying;
        let SpecInventory {
            dirs: l_dirs,
            files: l_files,
            n_bytes_total,
            warnings,
            ..
        } = spec_inventory;
        let mut builder_cp_report = ReportCopyBuilder::default();
        builder_cp_report.set_bytes_total(n_bytes_total);
        builder_cp_report.extend_warnings(warnings);

        for spec_dir_entry in &l_dirs {
            if self.is_cancelled() {
                return Ok(EnumRunExit::Cancelled);
            }
            self.create_destination_dir(spec_dir_entry, &mut builder_cp_report)?;
        }

        for spec_file_entry in &l_files {
            if self.is_cancelled() {
                return Ok(EnumRunExit::Cancelled);
            }
            self.copy_file_entry(spec_file_entry, &mut builder_cp_report)?;
        }

        if self.is_cancelled() {
            return Ok(EnumRunExit::Cancelled);
        }
        // Deepest first: a parent without search permission must not block its children.
        for spec_dir_entry in l_dirs.iter().rev() {
            let path_dir_dst_sub =
                derive_destination_path(&spec_dir_entry.path, path_dir_src, path_dir_dst);
            apply_dir_metadata(
                &spec_dir_entry.path,
                &path_dir_dst_sub,
                spec_dir_entry.mode,
                &self.spec_cp_options,
            )
            .map_err(|e| CopyError::Metadata {
                path: path_dir_dst_sub,
                source: e,
            })?;
        }

        *self.current_copy.write() = None;
        Ok(EnumRunExit::Done(builder_cp_report.build()))
    }

    fn create_destination_dir(
        &self,
        spec_dir_entry: &SpecDirEntry,
        builder_cp_report: &mut ReportCopyBuilder,
    ) -> Result<(), CopyError> {
        let path_dir_dst_sub = derive_destination_path(
            &spec_dir_entry.path,
            &self.path_dir_src,
            &self.path_dir_dst,
        );
        validate_destination_path_safety(&path_dir_dst_sub, &self.path_dir_dst)
            .map_err(CopyError::UnsafeDestination)?;

        match fs::create_dir(&path_dir_dst_sub) {
            Ok(()) => builder_cp_report.add_dir_created(),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path_dir_dst_sub.is_dir() => {
                debug!(path = %path_dir_dst_sub.display(), "reusing existing directory");
            }
            Err(e) => {
                return Err(CopyError::CreateDir {
                    path: path_dir_dst_sub,
                    source: e,
                });
            }
        }

        set_mode(&path_dir_dst_sub, N_MODE_DIR_WRITABLE).map_err(|e| CopyError::CreateDir {
            path: path_dir_dst_sub,
            source: e,
        })
    }

    fn copy_file_entry(
        &self,
        spec_file_entry: &SpecFileEntry,
        builder_cp_report: &mut ReportCopyBuilder,
    ) -> Result<(), CopyError> {
        let path_file_src = &spec_file_entry.path;
        let path_file_dst =
            derive_destination_path(path_file_src, &self.path_dir_src, &self.path_dir_dst);
        validate_destination_path_safety(&path_file_dst, &self.path_dir_dst)
            .map_err(CopyError::UnsafeDestination)?;

        // A stale file at the final path must not count as progress.
        let path_file_written = if spec_file_entry.if_is_symlink {
            path_file_dst.clone()
        } else {
            derive_partial_path(&path_file_dst)
        };
        *self.current_copy.write() = Some(SpecCopyInFlight {
            spec_current: SpecCurrentCopy {
                path_file: path_file_dst.clone(),
                size: spec_file_entry.size,
            },
            path_file_written,
        });
        self.fire_file_started();
        let map_copy_err = |e: io::Error| CopyError::CopyFile {
            path_src: path_file_src.clone(),
            path_dst: path_file_dst.clone(),
            source: e,
        };

        if spec_file_entry.if_is_symlink {
            create_symbolic_link(path_file_src, &path_file_dst, &self.spec_cp_options)
                .map_err(map_copy_err)?;
            builder_cp_report.add_symlink();
            return Ok(());
        }

        match self.spec_cp_options.rule_conflict_file {
            EnumCopyFileConflictStrategy::SkipIdentical => {
                let stat_src = fs::metadata(path_file_src).map_err(map_copy_err)?;
                if is_identical_file(&stat_src, &path_file_dst) {
                    debug!(path = %path_file_dst.display(), "identical file kept");
                    builder_cp_report.add_file_skipped(spec_file_entry.size);
                    self.n_bytes_copied
                        .fetch_add(spec_file_entry.size, Ordering::AcqRel);
                    return Ok(());
                }
            }
            EnumCopyFileConflictStrategy::Error => {
                if fs::symlink_metadata(&path_file_dst).is_ok() {
                    return Err(CopyError::DestinationExists(path_file_dst.clone()));
                }
            }
            EnumCopyFileConflictStrategy::Overwrite => {}
        }

        copy_file_with_metadata(path_file_src, &path_file_dst, &self.spec_cp_options)
            .map_err(map_copy_err)?;
        if let Some(in_flight) = self.current_copy.write().as_mut() {
            in_flight.path_file_written = path_file_dst.clone();
        }
        builder_cp_report.add_file_copied(spec_file_entry.size);
        self.n_bytes_copied
            .fetch_add(spec_file_entry.size, Ordering::AcqRel);
        Ok(())
    }
}

/// Copy a directory tree from `dir_source` to `dir_destination` on the calling thread.
///
/// Convenience wrapper for callers that need neither progress nor cancellation.
pub fn copy_tree<P, Q>(
    dir_source: P,
    dir_destination: Q,
    spec_cp_options: SpecCopyOptions,
) -> EnumCopyOutcome
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    CopyTask::new(dir_source, dir_destination, spec_cp_options).run()
}
