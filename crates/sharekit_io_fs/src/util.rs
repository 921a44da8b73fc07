use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::{FileTime, set_file_times};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use tracing::debug;

use crate::spec::{EnumCopyPatternMode, ScanError, SpecCopyOptions};

/// Suffix of the hidden sibling a file is written to before the final rename.
pub(crate) const C_PARTIAL_SUFFIX: &str = ".sharekit-partial";
/// Owner bits needed to write extended attributes before the final mode lands.
#[cfg(target_os = "linux")]
const N_MODE_OWNER_RW: u32 = 0o600;

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypeCopyPatternSeq {
    Literal(Vec<String>),
    Glob(Vec<GlobMatcher>),
    Regex(Vec<Regex>),
}

/// Compiled ignore list, matched against entry base names.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecIgnorePatterns {
    patterns_ignore: Option<TypeCopyPatternSeq>,
}

impl SpecIgnorePatterns {
    pub(crate) fn from_raw(
        names_ignore: &[String],
        rule_pattern: EnumCopyPatternMode,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            patterns_ignore: _compile(names_ignore, rule_pattern)?,
        })
    }

    pub(crate) fn is_ignored(&self, name: &str) -> bool {
        match &self.patterns_ignore {
            None => false,
            Some(TypeCopyPatternSeq::Literal(v)) => v.iter().any(|p| p == name),
            Some(TypeCopyPatternSeq::Glob(v)) => v.iter().any(|p| p.is_match(name)),
            Some(TypeCopyPatternSeq::Regex(v)) => v.iter().any(|p| p.is_match(name)),
        }
    }
}

fn _compile(
    patterns: &[String],
    rule_pattern: EnumCopyPatternMode,
) -> Result<Option<TypeCopyPatternSeq>, ScanError> {
    if patterns.is_empty() {
        return Ok(None);
    }

    match rule_pattern {
        EnumCopyPatternMode::Literal => Ok(Some(TypeCopyPatternSeq::Literal(patterns.to_vec()))),
        EnumCopyPatternMode::Glob => {
            let mut l_glob = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let matcher = Glob::new(pattern)
                    .map_err(|e| ScanError::InvalidPattern(format!("{pattern} ({e})")))?
                    .compile_matcher();
                l_glob.push(matcher);
            }
            Ok(Some(TypeCopyPatternSeq::Glob(l_glob)))
        }
        EnumCopyPatternMode::Regex => {
            let mut l_regex = Vec::with_capacity(patterns.len());
            for pattern in patterns {
                let regex = Regex::new(pattern)
                    .map_err(|e| ScanError::InvalidPattern(format!("{pattern} ({e})")))?;
                l_regex.push(regex);
            }
            Ok(Some(TypeCopyPatternSeq::Regex(l_regex)))
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

fn _normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    _absolutize_path(path)
}

fn _absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

pub(crate) fn is_overlap(src: &Path, dst: &Path) -> bool {
    let src_resolved = _normalize_path(src);
    let dst_resolved = _normalize_path(dst);
    dst_resolved.starts_with(&src_resolved) || src_resolved.starts_with(&dst_resolved)
}

/// Reject destination paths that leave the destination root or traverse a
/// symlink planted inside it.
pub(crate) fn validate_destination_path_safety(
    path_dst_item: &Path,
    path_dir_dst_root: &Path,
) -> Result<(), String> {
    let path_dir_dst_root_abs = _absolutize_path(path_dir_dst_root);
    let path_dst_item_abs = _absolutize_path(path_dst_item);

    let path_parent_dst = path_dst_item_abs
        .parent()
        .filter(|p| p.starts_with(&path_dir_dst_root_abs))
        .ok_or_else(|| {
            format!(
                "Unsafe destination path escapes destination root: {} (root={})",
                path_dst_item.display(),
                path_dir_dst_root.display()
            )
        })?;

    let path_parent_rel = path_parent_dst
        .strip_prefix(&path_dir_dst_root_abs)
        .unwrap_or(Path::new(""));
    let mut path_cursor = path_dir_dst_root_abs.clone();
    for part_rel in path_parent_rel.components() {
        path_cursor.push(part_rel.as_os_str());
        match fs::symlink_metadata(&path_cursor) {
            Ok(meta_cursor) if meta_cursor.file_type().is_symlink() => {
                return Err(format!(
                    "Unsafe destination path traverses symlink component: {}",
                    path_cursor.display()
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(format!(
                    "Failed to inspect destination path component {} ({e})",
                    path_cursor.display()
                ));
            }
        }
    }

    Ok(())
}

/// Map `path_src` under `path_dir_src` to the same relative path under `path_dir_dst`.
pub(crate) fn derive_destination_path(
    path_src: &Path,
    path_dir_src: &Path,
    path_dir_dst: &Path,
) -> PathBuf {
    match path_src.strip_prefix(path_dir_src) {
        Ok(path_rel) => path_dir_dst.join(path_rel),
        Err(_) => path_dir_dst.join(path_src.file_name().unwrap_or_default()),
    }
}

/// Hidden sibling used while a file is in flight, e.g. `dir/.a.txt.sharekit-partial`.
pub(crate) fn derive_partial_path(path_file_dst: &Path) -> PathBuf {
    let c_name = path_file_dst
        .file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default();
    path_file_dst.with_file_name(format!(".{c_name}{C_PARTIAL_SUFFIX}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Metadata

/// Permission bits (including setuid/setgid/sticky) of `meta`.
pub(crate) fn derive_mode(meta: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if meta.permissions().readonly() { 0o555 } else { 0o777 }
    }
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
    #[cfg(not(unix))]
    {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o222 == 0);
        fs::set_permissions(path, permissions)
    }
}

/// `true` when `path_file_dst` is a regular file with the size and mtime of `stat_src`.
pub(crate) fn is_identical_file(stat_src: &fs::Metadata, path_file_dst: &Path) -> bool {
    let Ok(stat_dst) = fs::symlink_metadata(path_file_dst) else {
        return false;
    };
    stat_dst.file_type().is_file()
        && stat_dst.len() == stat_src.len()
        && FileTime::from_last_modification_time(&stat_dst)
            == FileTime::from_last_modification_time(stat_src)
}

/// Copy content and metadata through a hidden sibling, then rename into place.
///
/// A failed copy removes the sibling, so the destination namespace only ever
/// shows complete files.
pub(crate) fn copy_file_with_metadata(
    path_file_src: &Path,
    path_file_dst: &Path,
    spec_cp_options: &SpecCopyOptions,
) -> io::Result<()> {
    let path_file_partial = derive_partial_path(path_file_dst);
    let res_copy = (|| -> io::Result<()> {
        fs::copy(path_file_src, &path_file_partial)?;
        apply_file_metadata(path_file_src, &path_file_partial, spec_cp_options)?;
        fs::rename(&path_file_partial, path_file_dst)
    })();

    if res_copy.is_err() {
        let _ = fs::remove_file(&path_file_partial);
    }
    res_copy
}

fn apply_file_metadata(
    path_file_src: &Path,
    path_file_dst: &Path,
    spec_cp_options: &SpecCopyOptions,
) -> io::Result<()> {
    let stat_src = fs::metadata(path_file_src)?;
    // fs::copy already carried a possibly read-only source mode over.
    #[cfg(target_os = "linux")]
    {
        if spec_cp_options.if_preserve_xattrs {
            set_mode(path_file_dst, derive_mode(&stat_src) | N_MODE_OWNER_RW)?;
            copy_xattrs_linux(path_file_src, path_file_dst);
        }
    }

    if spec_cp_options.if_preserve_ownership {
        apply_ownership(&stat_src, path_file_dst, false)?;
    }
    // chown may clear setuid/setgid, so the mode goes after it.
    set_mode(path_file_dst, derive_mode(&stat_src))?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_file_dst, file_time_access, file_time_modify)
}

/// Restore mode and times of a destination directory from its source.
pub(crate) fn apply_dir_metadata(
    path_dir_src: &Path,
    path_dir_dst: &Path,
    mode: u32,
    spec_cp_options: &SpecCopyOptions,
) -> io::Result<()> {
    let stat_src = fs::metadata(path_dir_src)?;
    // Still writable from creation; the source mode may forbid xattr writes.
    #[cfg(target_os = "linux")]
    {
        if spec_cp_options.if_preserve_xattrs {
            copy_xattrs_linux(path_dir_src, path_dir_dst);
        }
    }

    if spec_cp_options.if_preserve_ownership {
        apply_ownership(&stat_src, path_dir_dst, false)?;
    }
    set_mode(path_dir_dst, mode)?;

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_dir_dst, file_time_access, file_time_modify)
}

#[cfg(unix)]
fn apply_ownership(stat_src: &fs::Metadata, path_dst: &Path, if_symlink: bool) -> io::Result<()> {
    use std::os::unix::fs::{MetadataExt, chown, lchown};

    let (uid, gid) = (stat_src.uid(), stat_src.gid());
    let res_chown = if if_symlink {
        lchown(path_dst, Some(uid), Some(gid))
    } else {
        chown(path_dst, Some(uid), Some(gid))
    };
    match res_chown {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(path = %path_dst.display(), uid, gid, "ownership not preserved ({e})");
            Ok(())
        }
        other => other,
    }
}

#[cfg(not(unix))]
fn apply_ownership(_stat_src: &fs::Metadata, _path_dst: &Path, _if_symlink: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn copy_xattrs_linux(path_src: &Path, path_dst: &Path) {
    let iter_xattr_names = match xattr::list(path_src) {
        Ok(v) => v,
        Err(_) => return,
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_src, &name).ok().flatten() else {
            continue;
        };
        if let Err(e) = xattr::set(path_dst, &name, &raw_value) {
            debug!(path = %path_dst.display(), "xattr {name:?} not preserved ({e})");
        }
    }
}

/// Recreate the symlink `path_src` at `path_dst`, replacing a non-directory there.
pub(crate) fn create_symbolic_link(
    path_src: &Path,
    path_dst: &Path,
    spec_cp_options: &SpecCopyOptions,
) -> io::Result<()> {
    let target = fs::read_link(path_src)?;
    if let Ok(meta_dst) = fs::symlink_metadata(path_dst)
        && !meta_dst.file_type().is_dir()
    {
        fs::remove_file(path_dst)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&target, path_dst)?;
        if spec_cp_options.if_preserve_ownership {
            let stat_src = fs::symlink_metadata(path_src)?;
            apply_ownership(&stat_src, path_dst, true)?;
        }
        Ok(())
    }
    #[cfg(windows)]
    {
        use std::os::windows::fs::{symlink_dir, symlink_file};
        let _ = spec_cp_options;
        if path_src.is_dir() {
            symlink_dir(&target, path_dst)
        } else {
            symlink_file(&target, path_dst)
        }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, spec_cp_options);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Symbolic links are unsupported on this platform",
        ))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
