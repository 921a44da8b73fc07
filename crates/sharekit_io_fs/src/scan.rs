//! Single-pass source tree inventory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::spec::{EnumCopyPatternMode, ScanError};
use crate::util::{SpecIgnorePatterns, derive_mode};

/// One scanned source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDirEntry {
    /// Absolute source path.
    pub path: PathBuf,
    /// Permission bits of the source directory.
    pub mode: u32,
}

/// One scanned source file or symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFileEntry {
    /// Absolute source path.
    pub path: PathBuf,
    /// Size in bytes; `0` for symlinks.
    pub size: u64,
    /// Entry is a symbolic link and is recreated, not followed.
    pub if_is_symlink: bool,
}

/// Ordered result of one scan.
///
/// `dirs` is in pre-order: every directory precedes its descendants.
#[derive(Debug, Clone, Default)]
pub struct SpecInventory {
    pub dirs: Vec<SpecDirEntry>,
    pub files: Vec<SpecFileEntry>,
    /// Sum of `files[*].size`.
    pub n_bytes_total: u64,
    /// Non-fatal findings (special files, hard links).
    pub warnings: Vec<String>,
    /// The cancel flag stopped the walk; the inventory is partial.
    pub if_interrupted: bool,
}

/// Walks a source tree once and records what a copy has to reproduce.
///
/// Ignore patterns are matched against base names. A matching directory is
/// pruned with its whole subtree, since nothing below it could be created
/// without its parent.
#[derive(Debug, Clone)]
pub struct TreeScanner {
    spec_ignore: SpecIgnorePatterns,
    flag_cancel: Option<Arc<AtomicBool>>,
}

impl TreeScanner {
    pub fn new(
        names_ignore: &[String],
        rule_pattern: EnumCopyPatternMode,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            spec_ignore: SpecIgnorePatterns::from_raw(names_ignore, rule_pattern)?,
            flag_cancel: None,
        })
    }

    /// Stop walking (with `if_interrupted` set) once `flag_cancel` turns `true`.
    pub fn with_cancel_flag(mut self, flag_cancel: Arc<AtomicBool>) -> Self {
        self.flag_cancel = Some(flag_cancel);
        self
    }

    pub fn scan(&self, path_root: &Path) -> Result<SpecInventory, ScanError> {
        if !path_root.is_dir() {
            return Err(ScanError::SourceNotDirectory(path_root.to_path_buf()));
        }

        let mut spec_inventory = SpecInventory::default();
        self.walk_directory(path_root, &mut spec_inventory)?;
        debug!(
            root = %path_root.display(),
            dirs = spec_inventory.dirs.len(),
            files = spec_inventory.files.len(),
            bytes = spec_inventory.n_bytes_total,
            interrupted = spec_inventory.if_interrupted,
            "scan finished"
        );
        Ok(spec_inventory)
    }

    fn is_cancelled(&self) -> bool {
        self.flag_cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn walk_directory(
        &self,
        path_dir: &Path,
        spec_inventory: &mut SpecInventory,
    ) -> Result<(), ScanError> {
        if self.is_cancelled() {
            spec_inventory.if_interrupted = true;
            return Ok(());
        }

        let iter_entries = fs::read_dir(path_dir).map_err(|e| ScanError::ReadDir {
            path: path_dir.to_path_buf(),
            source: e,
        })?;

        let mut l_entries = Vec::new();
        for _entry_res in iter_entries {
            let entry = _entry_res.map_err(|e| ScanError::ReadDir {
                path: path_dir.to_path_buf(),
                source: e,
            })?;
            l_entries.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
        l_entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut l_dirs_sub: Vec<PathBuf> = Vec::new();
        for (c_name, path_entry) in l_entries {
            if self.spec_ignore.is_ignored(&c_name) {
                debug!(path = %path_entry.display(), "ignored by name");
                continue;
            }

            // symlink_metadata: links are recorded as links, never followed.
            let meta_entry = fs::symlink_metadata(&path_entry).map_err(|e| ScanError::Stat {
                path: path_entry.clone(),
                source: e,
            })?;
            let cfg_file_type = meta_entry.file_type();

            if cfg_file_type.is_dir() {
                spec_inventory.dirs.push(SpecDirEntry {
                    path: path_entry.clone(),
                    mode: derive_mode(&meta_entry),
                });
                l_dirs_sub.push(path_entry);
            } else if cfg_file_type.is_file() {
                warn_hard_link(&path_entry, &meta_entry, spec_inventory);
                spec_inventory.n_bytes_total += meta_entry.len();
                spec_inventory.files.push(SpecFileEntry {
                    path: path_entry,
                    size: meta_entry.len(),
                    if_is_symlink: false,
                });
            } else if cfg_file_type.is_symlink() {
                spec_inventory.files.push(SpecFileEntry {
                    path: path_entry,
                    size: 0,
                    if_is_symlink: true,
                });
            } else {
                let c_warning = format!("Special file skipped: {}", path_entry.display());
                warn!("{c_warning}");
                spec_inventory.warnings.push(c_warning);
            }
        }

        for path_dir_sub in l_dirs_sub {
            self.walk_directory(&path_dir_sub, spec_inventory)?;
            if spec_inventory.if_interrupted {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn warn_hard_link(path_entry: &Path, meta_entry: &fs::Metadata, spec_inventory: &mut SpecInventory) {
    use std::os::unix::fs::MetadataExt;

    if meta_entry.nlink() > 1 {
        let c_warning = format!("Hard link detected: {}", path_entry.display());
        warn!("{c_warning}");
        spec_inventory.warnings.push(c_warning);
    }
}

#[cfg(not(unix))]
fn warn_hard_link(_path_entry: &Path, _meta_entry: &fs::Metadata, _spec_inventory: &mut SpecInventory) {}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::TreeScanner;
    use crate::spec::{EnumCopyPatternMode, ScanError};

    struct TestDir {
        path: PathBuf,
    }

    impl TestDir {
        fn new() -> Self {
            let n = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos();
            let path = std::env::temp_dir().join(format!("sharekit_scan_test_{n}"));
            std::fs::create_dir_all(&path).expect("create test dir");
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    fn scanner(names_ignore: &[&str]) -> TreeScanner {
        let names_ignore: Vec<String> = names_ignore.iter().map(|v| v.to_string()).collect();
        TreeScanner::new(&names_ignore, EnumCopyPatternMode::Literal).expect("scanner")
    }

    #[test]
    fn scan_lists_dirs_preorder_and_sums_bytes() {
        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "12345");
        write_text(&src.join("sub/b.txt"), "0123456789");
        write_text(&src.join("sub/deep/c.txt"), "xy");
        write_text(&src.join("z/d.txt"), "");

        let spec_inventory = scanner(&[]).scan(&src).expect("scan");

        let l_dirs: Vec<_> = spec_inventory.dirs.iter().map(|d| d.path.clone()).collect();
        assert_eq!(l_dirs, vec![src.join("sub"), src.join("z"), src.join("sub/deep")]);
        let l_files: Vec<_> = spec_inventory.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            l_files,
            vec![
                src.join("a.txt"),
                src.join("sub/b.txt"),
                src.join("sub/deep/c.txt"),
                src.join("z/d.txt"),
            ]
        );
        assert_eq!(spec_inventory.n_bytes_total, 17);
        assert!(!spec_inventory.if_interrupted);
    }

    #[test]
    fn scan_prunes_ignored_directory_subtree() {
        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        write_text(&src.join("a.txt"), "12345");
        write_text(&src.join("sub/b.txt"), "0123456789");
        write_text(&src.join("keep/sub/c.txt"), "abc");

        let spec_inventory = scanner(&["sub"]).scan(&src).expect("scan");

        assert_eq!(spec_inventory.dirs.len(), 1);
        assert_eq!(spec_inventory.dirs[0].path, src.join("keep"));
        assert_eq!(spec_inventory.files.len(), 1);
        assert_eq!(spec_inventory.n_bytes_total, 5);
    }

    #[test]
    fn scan_ignores_files_by_base_name_at_any_depth() {
        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        write_text(&src.join("lost+found"), "x");
        write_text(&src.join("a/lost+found"), "x");
        write_text(&src.join("a/keep.txt"), "keep");

        let spec_inventory = scanner(&["lost+found"]).scan(&src).expect("scan");
        assert_eq!(spec_inventory.files.len(), 1);
        assert_eq!(spec_inventory.files[0].path, src.join("a/keep.txt"));
        assert_eq!(spec_inventory.n_bytes_total, 4);
    }

    #[test]
    fn scan_missing_root_fails() {
        let tmp = TestDir::new();
        let err = scanner(&[]).scan(&tmp.path().join("missing")).expect_err("must fail");
        assert!(matches!(err, ScanError::SourceNotDirectory(_)));
    }

    #[test]
    fn scan_stops_when_cancel_flag_set() {
        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        write_text(&src.join("a/a.txt"), "a");

        let spec_inventory = scanner(&[])
            .with_cancel_flag(Arc::new(AtomicBool::new(true)))
            .scan(&src)
            .expect("scan");
        assert!(spec_inventory.if_interrupted);
        assert!(spec_inventory.files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn scan_records_symlinks_without_following() {
        use std::os::unix::fs::symlink;

        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        write_text(&src.join("real/a.txt"), "aaaa");
        symlink(src.join("real"), src.join("link_dir")).expect("symlink");

        let spec_inventory = scanner(&[]).scan(&src).expect("scan");
        assert_eq!(spec_inventory.dirs.len(), 1);
        let entry_link = spec_inventory
            .files
            .iter()
            .find(|f| f.path == src.join("link_dir"))
            .expect("link entry");
        assert!(entry_link.if_is_symlink);
        assert_eq!(entry_link.size, 0);
        assert_eq!(spec_inventory.n_bytes_total, 4);
    }

    #[cfg(unix)]
    #[test]
    fn scan_records_directory_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TestDir::new();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("locked")).expect("mkdir");
        std::fs::set_permissions(src.join("locked"), std::fs::Permissions::from_mode(0o750))
            .expect("chmod");

        let spec_inventory = scanner(&[]).scan(&src).expect("scan");
        assert_eq!(spec_inventory.dirs[0].mode, 0o750);
    }
}
