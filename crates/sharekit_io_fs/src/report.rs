//! Copy report models and mutable report builder.

use std::collections::BTreeMap;
use std::fmt;

/// Aggregate counters and diagnostics for one completed copy run.
#[derive(Debug, Default, Clone)]
pub struct ReportCopy {
    /// Destination directories created (reused ones excluded).
    pub cnt_dirs_created: u64,
    /// Regular files copied.
    pub cnt_files_copied: u64,
    /// Regular files left in place by `SkipIdentical`.
    pub cnt_files_skipped: u64,
    /// Symbolic links recreated.
    pub cnt_symlinks: u64,
    /// Bytes accounted as copied (skipped identical files included).
    pub n_bytes_copied: u64,
    /// Bytes found by the scan.
    pub n_bytes_total: u64,
    /// Non-fatal warnings collected during scan/copy.
    pub warnings: Vec<String>,
}

impl ReportCopy {
    /// Number of collected warnings.
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Machine-readable counters.
    pub fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_dirs_created".to_string(), self.cnt_dirs_created);
        dict_counts.insert("cnt_files_copied".to_string(), self.cnt_files_copied);
        dict_counts.insert("cnt_files_skipped".to_string(), self.cnt_files_skipped);
        dict_counts.insert("cnt_symlinks".to_string(), self.cnt_symlinks);
        dict_counts.insert("n_bytes_copied".to_string(), self.n_bytes_copied);
        dict_counts.insert("n_bytes_total".to_string(), self.n_bytes_total);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        let dict_counts = self.to_dict();
        format!(
            "{prefix} dirs={} files={} skipped={} symlinks={} bytes={}/{} warnings={}",
            dict_counts["cnt_dirs_created"],
            dict_counts["cnt_files_copied"],
            dict_counts["cnt_files_skipped"],
            dict_counts["cnt_symlinks"],
            dict_counts["n_bytes_copied"],
            dict_counts["n_bytes_total"],
            dict_counts["cnt_warnings"]
        )
    }
}

impl fmt::Display for ReportCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Mutable accumulator owned by the thread running the copy.
#[derive(Debug, Default, Clone)]
pub struct ReportCopyBuilder {
    cnt_dirs_created: u64,
    cnt_files_copied: u64,
    cnt_files_skipped: u64,
    cnt_symlinks: u64,
    n_bytes_copied: u64,
    n_bytes_total: u64,
    warnings: Vec<String>,
}

impl ReportCopyBuilder {
    pub fn add_dir_created(&mut self) {
        self.cnt_dirs_created += 1;
    }

    pub fn add_file_copied(&mut self, n_bytes: u64) {
        self.cnt_files_copied += 1;
        self.n_bytes_copied += n_bytes;
    }

    pub fn add_file_skipped(&mut self, n_bytes: u64) {
        self.cnt_files_skipped += 1;
        self.n_bytes_copied += n_bytes;
    }

    pub fn add_symlink(&mut self) {
        self.cnt_symlinks += 1;
    }

    pub fn set_bytes_total(&mut self, n_bytes_total: u64) {
        self.n_bytes_total = n_bytes_total;
    }

    /// Add warning messages.
    pub fn extend_warnings<I: IntoIterator<Item = String>>(&mut self, warnings: I) {
        self.warnings.extend(warnings);
    }

    /// Finalize builder into immutable report.
    pub fn build(self) -> ReportCopy {
        ReportCopy {
            cnt_dirs_created: self.cnt_dirs_created,
            cnt_files_copied: self.cnt_files_copied,
            cnt_files_skipped: self.cnt_files_skipped,
            cnt_symlinks: self.cnt_symlinks,
            n_bytes_copied: self.n_bytes_copied,
            n_bytes_total: self.n_bytes_total,
            warnings: self.warnings,
        }
    }
}
