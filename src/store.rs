//! Vector store: one directory per year, one file per item
//!
//! ```text
//! <root>/
//!   1999/
//!     1234-567.npy
//!     1234-568.npy
//!   2000/
//!     ...
//! ```
//!
//! Filenames are the identifier's filesystem form (see [`crate::codec`]).
//! A year directory is any child directory whose name parses as an integer.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use rand::Rng;
use tempora_core::{FormatError, VectorFormat};
use thiserror::Error;

use crate::codec::{filename_to_identifier, identifier_to_filename, round_trips};

/// Extension of the display images the front end serves
pub const IMAGE_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Identifier not found: {0}")]
    NotFound(String),

    #[error("Vector file for {id} not found at {path:?}")]
    MissingFile { id: String, path: PathBuf },

    #[error("Dimension mismatch for {id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to decode {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::MissingFile { .. })
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One vector file found by [`VectorStore::discover`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVector {
    pub identifier: String,
    pub year: i32,
    pub path: PathBuf,
}

/// Result of scanning the store
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Every year directory, including empty ones
    pub years: BTreeSet<i32>,
    /// All vector files, sorted by path
    pub entries: Vec<StoredVector>,
}

impl Discovery {
    /// `(min_year, max_year)`, or `None` for a store with no year directories
    pub fn year_range(&self) -> Option<(i32, i32)> {
        Some((*self.years.first()?, *self.years.last()?))
    }

    /// Entries with `start <= year <= end`, still in path order
    pub fn in_years(&self, start: i32, end: i32) -> impl Iterator<Item = &StoredVector> {
        self.entries
            .iter()
            .filter(move |e| e.year >= start && e.year <= end)
    }

    pub fn year_map(&self) -> YearMap {
        let mut map = YearMap::default();
        for entry in &self.entries {
            map.insert(entry.identifier.clone(), entry.year);
        }
        map
    }
}

/// identifier → year, the source of truth for item membership
#[derive(Debug, Clone, Default)]
pub struct YearMap {
    years: HashMap<String, i32>,
    /// Insertion order, for uniform sampling
    identifiers: Vec<String>,
}

impl YearMap {
    pub fn insert(&mut self, identifier: String, year: i32) {
        match self.years.insert(identifier.clone(), year) {
            None => self.identifiers.push(identifier),
            Some(previous) if previous != year => {
                tracing::warn!(
                    "Identifier {} stored under both {} and {}; keeping {}",
                    identifier,
                    previous,
                    year,
                    year
                );
            }
            Some(_) => {}
        }
    }

    pub fn year_of(&self, identifier: &str) -> Option<i32> {
        self.years.get(identifier).copied()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.years.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }

    /// Draw `n` identifiers uniformly, with replacement
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<(&str, i32)> {
        if self.identifiers.is_empty() {
            return Vec::new();
        }
        (0..n)
            .map(|_| {
                let id = &self.identifiers[rng.gen_range(0..self.identifiers.len())];
                (id.as_str(), self.years[id])
            })
            .collect()
    }
}

/// Display path of an item's image, relative to the image root
pub fn image_path_for(year: i32, identifier: &str) -> String {
    format!(
        "{}/{}.{}",
        year,
        identifier_to_filename(identifier),
        IMAGE_EXTENSION
    )
}

/// Read/write access to the year-partitioned vector directory
#[derive(Debug, Clone)]
pub struct VectorStore {
    root: PathBuf,
    format: VectorFormat,
    dim: usize,
}

impl VectorStore {
    pub fn new(root: impl Into<PathBuf>, format: VectorFormat, dim: usize) -> Self {
        Self {
            root: root.into(),
            format,
            dim,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> VectorFormat {
        self.format
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Scan every year directory for vector files
    pub fn discover(&self) -> Result<Discovery, StoreError> {
        let mut discovery = Discovery::default();
        let extension = self.format.extension();

        for dir_entry in std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let dir_entry = dir_entry.map_err(|e| StoreError::io(&self.root, e))?;
            let path = dir_entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let Ok(year) = name.parse::<i32>() else {
                tracing::warn!("Skipping non-year directory {:?}", path);
                continue;
            };
            discovery.years.insert(year);

            for file in std::fs::read_dir(&path).map_err(|e| StoreError::io(&path, e))? {
                let file_path = file.map_err(|e| StoreError::io(&path, e))?.path();
                if file_path.extension().and_then(|e| e.to_str()) != Some(extension) {
                    continue;
                }
                let Some(stem) = file_path.file_stem().and_then(|s| s.to_str()) else {
                    tracing::warn!("Skipping non-UTF-8 filename {:?}", file_path);
                    continue;
                };
                discovery.entries.push(StoredVector {
                    identifier: filename_to_identifier(stem),
                    year,
                    path: file_path.clone(),
                });
            }
        }

        discovery.entries.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(
            "Discovered {} vectors across {} years in {:?}",
            discovery.entries.len(),
            discovery.years.len(),
            self.root
        );
        Ok(discovery)
    }

    /// Scan the store and build the identifier → year map
    pub fn year_map(&self) -> Result<YearMap, StoreError> {
        Ok(self.discover()?.year_map())
    }

    pub fn vector_path(&self, year: i32, identifier: &str) -> PathBuf {
        self.root.join(year.to_string()).join(format!(
            "{}.{}",
            identifier_to_filename(identifier),
            self.format.extension()
        ))
    }

    /// Read the vector for `identifier`, using `years` to locate it
    pub fn load_vector(&self, years: &YearMap, identifier: &str) -> Result<Vec<f32>, StoreError> {
        let year = years
            .year_of(identifier)
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))?;
        let path = self.vector_path(year, identifier);
        if !path.is_file() {
            return Err(StoreError::MissingFile {
                id: identifier.to_string(),
                path,
            });
        }
        self.read_file(identifier, &path)
    }

    /// Decode one vector file and check its dimensionality
    pub fn read_file(&self, identifier: &str, path: &Path) -> Result<Vec<f32>, StoreError> {
        let vector = self
            .format
            .read(path)
            .map_err(|source| StoreError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                id: identifier.to_string(),
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Write a vector file for `identifier` under `year`
    pub fn write_vector(
        &self,
        identifier: &str,
        year: i32,
        vector: &[f32],
    ) -> Result<PathBuf, StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                id: identifier.to_string(),
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if !round_trips(identifier) {
            tracing::warn!(
                "Identifier {:?} contains '-' and will be read back as {:?}",
                identifier,
                filename_to_identifier(&identifier_to_filename(identifier))
            );
        }

        let year_dir = self.root.join(year.to_string());
        std::fs::create_dir_all(&year_dir).map_err(|e| StoreError::io(&year_dir, e))?;

        let path = self.vector_path(year, identifier);
        self.format
            .write(&path, vector)
            .map_err(|source| StoreError::Format {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    fn store_with(root: &Path, format: VectorFormat) -> VectorStore {
        let store = VectorStore::new(root, format, 3);
        store.write_vector("b:2", 2001, &[0.0, 1.0, 0.0]).unwrap();
        store.write_vector("a:1", 2001, &[1.0, 0.0, 0.0]).unwrap();
        store.write_vector("c:3", 1999, &[0.0, 0.0, 1.0]).unwrap();
        store
    }

    #[test]
    fn test_discover_sorted_by_path() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::Npy);

        let discovery = store.discover().unwrap();
        let ids: Vec<_> = discovery.entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["c:3", "a:1", "b:2"]);
        assert_eq!(discovery.year_range(), Some((1999, 2001)));
    }

    #[test]
    fn test_discover_skips_foreign_entries() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::RawF32);

        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();
        std::fs::write(dir.path().join("README"), "x").unwrap();
        std::fs::write(dir.path().join("2001").join("notes.txt"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("2005")).unwrap();

        let discovery = store.discover().unwrap();
        assert_eq!(discovery.entries.len(), 3);
        // Empty year directories still widen the range.
        assert_eq!(discovery.year_range(), Some((1999, 2005)));
    }

    #[test]
    fn test_in_years_filters_closed_range() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::Npy);
        let discovery = store.discover().unwrap();

        assert_eq!(discovery.in_years(1999, 2000).count(), 1);
        assert_eq!(discovery.in_years(2001, 2001).count(), 2);
        assert_eq!(discovery.in_years(1990, 2010).count(), 3);
    }

    #[test]
    fn test_load_vector() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::Npy);
        let years = store.year_map().unwrap();

        assert_eq!(years.year_of("a:1"), Some(2001));
        assert_eq!(store.load_vector(&years, "a:1").unwrap(), vec![1.0, 0.0, 0.0]);

        let err = store.load_vector(&years, "zzz").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_vector_missing_file() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::Npy);
        let years = store.year_map().unwrap();

        std::fs::remove_file(store.vector_path(1999, "c:3")).unwrap();
        let err = store.load_vector(&years, "c:3").unwrap_err();
        assert!(matches!(err, StoreError::MissingFile { .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dimension_checked_on_read_and_write() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), VectorFormat::Npy);
        assert!(matches!(
            store.write_vector("x:1", 2001, &[1.0]),
            Err(StoreError::DimensionMismatch { .. })
        ));

        let wide = VectorStore::new(dir.path(), VectorFormat::Npy, 4);
        let years = wide.year_map().unwrap();
        assert!(matches!(
            wide.load_vector(&years, "a:1"),
            Err(StoreError::DimensionMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_image_path_for() {
        assert_eq!(image_path_for(1987, "1234:567"), "1987/1234-567.jpg");
    }

    #[test]
    fn test_sample_with_replacement() {
        let mut map = YearMap::default();
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);

        let mut rng = StdRng::seed_from_u64(3);
        let sample = map.sample(&mut rng, 10);
        assert_eq!(sample.len(), 10);
        assert!(sample.iter().all(|(id, year)| map.year_of(id) == Some(*year)));

        assert!(YearMap::default().sample(&mut rng, 5).is_empty());
    }
}
