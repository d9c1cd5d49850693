//! On-disk layout of the persisted index set
//!
//! ```text
//! <index_dir>/
//!   50/
//!     1900.ann        # forest for window [1900, 1949]
//!     1900.ids.json   # identifiers in internal index order
//!   1/
//!     1900.ann
//!     1900.ids.json
//!     ...
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const INDEX_EXTENSION: &str = "ann";
const IDENTIFIERS_SUFFIX: &str = ".ids.json";

/// A persisted (step, start) pair found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionKey {
    pub step: u32,
    pub start: i32,
}

#[derive(Debug, Clone)]
pub struct IndexLayout {
    root: PathBuf,
}

impl IndexLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn step_dir(&self, step: u32) -> PathBuf {
        self.root.join(step.to_string())
    }

    pub fn index_path(&self, step: u32, start: i32) -> PathBuf {
        self.step_dir(step)
            .join(format!("{}.{}", start, INDEX_EXTENSION))
    }

    pub fn identifiers_path(&self, step: u32, start: i32) -> PathBuf {
        self.step_dir(step)
            .join(format!("{}{}", start, IDENTIFIERS_SUFFIX))
    }

    /// Every persisted index file, ordered by (step, start)
    ///
    /// Unrecognised directories and files are ignored.
    pub fn scan(&self) -> Result<Vec<PartitionKey>> {
        let mut keys = Vec::new();
        if !self.root.is_dir() {
            return Ok(keys);
        }

        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to read index directory {:?}", self.root))?;
        for entry in entries {
            let entry = entry?;
            let Ok(step) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            if step == 0 || !entry.path().is_dir() {
                continue;
            }

            let step_dir = entry.path();
            let files = std::fs::read_dir(&step_dir)
                .with_context(|| format!("failed to read step directory {:?}", step_dir))?;
            for file in files {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(INDEX_EXTENSION) {
                    continue;
                }
                let Some(start) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<i32>().ok())
                else {
                    continue;
                };
                keys.push(PartitionKey { step, start });
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Delete the index and identifier files in `step`'s directory whose
    /// start year is not in `keep`. Returns the removed start years.
    pub fn remove_stale(&self, step: u32, keep: &BTreeSet<i32>) -> Result<Vec<i32>> {
        let step_dir = self.step_dir(step);
        if !step_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut removed = BTreeSet::new();
        let files = std::fs::read_dir(&step_dir)
            .with_context(|| format!("failed to read step directory {:?}", step_dir))?;
        for file in files {
            let path = file?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(start) = partition_start(name) else {
                continue;
            };
            if keep.contains(&start) {
                continue;
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale file {:?}", path))?;
            removed.insert(start);
        }
        Ok(removed.into_iter().collect())
    }
}

/// Start year encoded in an index or identifier file name
fn partition_start(name: &str) -> Option<i32> {
    let stem = name
        .strip_suffix(IDENTIFIERS_SUFFIX)
        .or_else(|| name.strip_suffix(&format!(".{}", INDEX_EXTENSION)))?;
    stem.parse().ok()
}

/// Write `bytes` next to `path` and rename into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    std::fs::write(&tmp, bytes).with_context(|| format!("failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to rename {:?} into place", tmp))?;
    Ok(())
}
