//! Extension-independent dedup against the destination directory.
//!
//! The directory is read once per run. After that, membership checks are
//! hash lookups, and the set grows as artifacts complete.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::download::filename::{
    dedup_key, is_temp_file_name, sanitize_filename, stored_dedup_key,
};

/// Set of artifact base names already present in the destination.
#[derive(Debug, Clone, Default)]
pub struct DedupFilter {
    existing: HashSet<String>,
}

impl DedupFilter {
    /// Creates an empty filter (nothing is skipped).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `dir` once and records the base name of every regular file.
    ///
    /// Hidden files and in-progress temp files are ignored.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the directory cannot be listed.
    pub fn snapshot(dir: &Path) -> std::io::Result<Self> {
        let mut filter = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!(name = ?entry.file_name(), "ignoring non-UTF-8 file name");
                continue;
            };
            if name.starts_with('.') || is_temp_file_name(name) {
                continue;
            }
            filter.existing.insert(stored_dedup_key(name));
        }
        info!(dir = %dir.display(), existing = filter.existing.len(), "dedup snapshot taken");
        Ok(filter)
    }

    /// True when an artifact with this base name already exists.
    #[must_use]
    pub fn should_skip(&self, base_name: &str) -> bool {
        self.existing.contains(&normalize(base_name))
    }

    /// Records a newly completed artifact.
    pub fn record(&mut self, name: &str) {
        self.existing.insert(normalize(name));
    }

    /// Number of known base names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.existing.len()
    }

    /// True when no base names are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.existing.is_empty()
    }
}

/// Key used for both snapshot entries and queries.
pub(crate) fn normalize(base_name: &str) -> String {
    dedup_key(&sanitize_filename(base_name))
}

/// Deletes temp files left in `dir` by an interrupted run.
///
/// Returns how many were removed. Individual removal failures are logged
/// and skipped.
///
/// # Errors
///
/// Returns the IO error if the directory cannot be listed.
pub fn sweep_stale_temp_files(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_temp_file_name(name) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "failed to remove stale temp file"
                );
            }
        }
    }
    if removed > 0 {
        info!(dir = %dir.display(), removed, "removed stale temp files");
    }
    Ok(removed)
}
