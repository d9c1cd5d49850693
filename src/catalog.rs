//! In-memory catalog of loaded partitions
//!
//! A [`Catalog`] is built once by [`Catalog::load`] and is read-only after
//! that. Hot reload builds a complete replacement and swaps it into the
//! [`CatalogHandle`]; in-flight queries keep the `Arc` they started with.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tempora_core::{Forest, Metric};

use crate::config::EngineConfig;
use crate::layout::{IndexLayout, PartitionKey};
use crate::store::YearMap;

/// A loaded (step, window) partition
pub struct CatalogEntry {
    pub step: u32,
    pub start: i32,
    pub forest: Forest,
    /// Internal index `i` ↔ `identifiers[i]`
    pub identifiers: Vec<String>,
}

impl CatalogEntry {
    pub fn end(&self) -> i32 {
        (self.start as i64 + self.step as i64 - 1).min(i32::MAX as i64) as i32
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Disagreement between the store and the loaded partitions of one step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepSync {
    pub step: u32,
    /// In the year map, but in no partition of this step
    pub unindexed: usize,
    /// In a partition of this step, but not in the year map
    pub orphaned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub steps: Vec<StepSync>,
}

impl SyncReport {
    pub fn compute(entries: &[CatalogEntry], years: &YearMap) -> Self {
        let steps: BTreeSet<u32> = entries.iter().map(|e| e.step).collect();
        let steps = steps
            .into_iter()
            .map(|step| {
                let indexed: HashSet<&str> = entries
                    .iter()
                    .filter(|e| e.step == step)
                    .flat_map(|e| e.identifiers.iter().map(String::as_str))
                    .collect();
                StepSync {
                    step,
                    unindexed: years.identifiers().filter(|id| !indexed.contains(id)).count(),
                    orphaned: indexed.iter().filter(|id| !years.contains(id)).count(),
                }
            })
            .collect();
        Self { steps }
    }

    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.unindexed == 0 && s.orphaned == 0)
    }
}

pub struct Catalog {
    entries: Vec<CatalogEntry>,
    years: YearMap,
    metric: Metric,
    dim: usize,
    sync: SyncReport,
}

impl Catalog {
    /// Scan the store for the year map and load every persisted partition
    /// whose step is in `steps` (all steps when `steps` is empty).
    ///
    /// A missing index directory, overlapping windows, an unreadable index,
    /// a missing identifier list or a length mismatch fails the whole load.
    pub fn load(config: &EngineConfig, steps: &[u32]) -> Result<Self> {
        let store = config.store();
        let years = store
            .year_map()
            .with_context(|| format!("failed to scan vector store {:?}", store.root()))?;
        tracing::info!("Year map holds {} identifiers", years.len());

        let layout = config.layout();
        if !layout.root().is_dir() {
            bail!("index directory {:?} does not exist", layout.root());
        }
        let keys: Vec<PartitionKey> = layout
            .scan()?
            .into_iter()
            .filter(|k| steps.is_empty() || steps.contains(&k.step))
            .collect();
        check_disjoint(&keys)?;

        let entries = keys
            .par_iter()
            .map(|key| load_entry(&layout, *key, config))
            .collect::<Result<Vec<_>>>()?;

        for step in steps {
            if !entries.iter().any(|e| e.step == *step) {
                tracing::warn!("No persisted partitions for step {}", step);
            }
        }

        let catalog = Self::from_entries(entries, years, config.metric, config.dim);
        tracing::info!(
            "Loaded {} partitions for steps {:?}",
            catalog.len(),
            catalog.steps()
        );
        for s in &catalog.sync.steps {
            if s.unindexed > 0 || s.orphaned > 0 {
                tracing::warn!(
                    "Step {} is out of sync with the vector store: {} unindexed, {} orphaned",
                    s.step,
                    s.unindexed,
                    s.orphaned
                );
            }
        }
        Ok(catalog)
    }

    /// Assemble a catalog from already-loaded entries
    pub fn from_entries(
        mut entries: Vec<CatalogEntry>,
        years: YearMap,
        metric: Metric,
        dim: usize,
    ) -> Self {
        entries.sort_by_key(|e| (e.step, e.start));
        let sync = SyncReport::compute(&entries, &years);
        Self {
            entries,
            years,
            metric,
            dim,
            sync,
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entries_for_step(&self, step: u32) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |e| e.step == step)
    }

    /// Distinct loaded steps, ascending
    pub fn steps(&self) -> Vec<u32> {
        let mut steps: Vec<u32> = self.entries.iter().map(|e| e.step).collect();
        steps.dedup();
        steps
    }

    pub fn years(&self) -> &YearMap {
        &self.years
    }

    pub fn sync_report(&self) -> &SyncReport {
        &self.sync
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Windows of one step must not overlap. `keys` is sorted by (step, start).
fn check_disjoint(keys: &[PartitionKey]) -> Result<()> {
    for pair in keys.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.step == b.step && (b.start as i64) - (a.start as i64) < a.step as i64 {
            bail!(
                "step {} windows starting {} and {} overlap; rebuild the step",
                a.step,
                a.start,
                b.start
            );
        }
    }
    Ok(())
}

fn load_entry(layout: &IndexLayout, key: PartitionKey, config: &EngineConfig) -> Result<CatalogEntry> {
    let index_path = layout.index_path(key.step, key.start);
    let forest = Forest::load(&index_path)
        .with_context(|| format!("failed to load index {:?}", index_path))?;

    if forest.metric() != config.metric {
        bail!(
            "index {:?} uses metric {}, deployment is configured for {}",
            index_path,
            forest.metric(),
            config.metric
        );
    }
    if forest.dim() != config.dim {
        bail!(
            "index {:?} has dimension {}, deployment is configured for {}",
            index_path,
            forest.dim(),
            config.dim
        );
    }

    let ids_path = layout.identifiers_path(key.step, key.start);
    let bytes = std::fs::read(&ids_path)
        .with_context(|| format!("missing identifier list {:?}", ids_path))?;
    let identifiers: Vec<String> = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse identifier list {:?}", ids_path))?;

    if identifiers.len() != forest.len() {
        bail!(
            "identifier list {:?} has {} entries but index holds {} items",
            ids_path,
            identifiers.len(),
            forest.len()
        );
    }

    tracing::debug!(
        "Loaded step {} window {} with {} items",
        key.step,
        key.start,
        identifiers.len()
    );

    Ok(CatalogEntry {
        step: key.step,
        start: key.start,
        forest,
        identifiers,
    })
}

/// Atomically swappable catalog
pub struct CatalogHandle {
    current: ArcSwap<Catalog>,
    config: EngineConfig,
    steps: Vec<u32>,
    reload_lock: Mutex<()>,
}

impl CatalogHandle {
    pub fn load(config: EngineConfig, steps: Vec<u32>) -> Result<Self> {
        let catalog = Catalog::load(&config, &steps)?;
        Ok(Self {
            current: ArcSwap::from_pointee(catalog),
            config,
            steps,
            reload_lock: Mutex::new(()),
        })
    }

    pub fn current(&self) -> Arc<Catalog> {
        self.current.load_full()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load a fresh catalog and swap it in. On failure the current catalog
    /// stays in place.
    pub fn reload(&self) -> Result<Arc<Catalog>> {
        let _guard = self.reload_lock.lock();
        let catalog = Arc::new(Catalog::load(&self.config, &self.steps)?);
        self.current.store(catalog.clone());
        tracing::info!("Catalog reloaded: {} partitions", catalog.len());
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: u32, start: i32, ids: &[&str]) -> CatalogEntry {
        let mut forest = Forest::new_with_seed(2, Metric::Angular, 0);
        for i in 0..ids.len() {
            forest.add_item(i, &[1.0, i as f32]).unwrap();
        }
        forest.build(1).unwrap();
        CatalogEntry {
            step,
            start,
            forest,
            identifiers: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn years(ids: &[(&str, i32)]) -> YearMap {
        let mut map = YearMap::default();
        for (id, year) in ids {
            map.insert(id.to_string(), *year);
        }
        map
    }

    #[test]
    fn test_sync_report_clean() {
        let entries = vec![entry(1, 2000, &["a", "b"]), entry(1, 2001, &["c"])];
        let report = SyncReport::compute(&entries, &years(&[("a", 2000), ("b", 2000), ("c", 2001)]));
        assert!(report.is_clean());
        assert_eq!(report.steps.len(), 1);
    }

    #[test]
    fn test_sync_report_detects_drift() {
        let entries = vec![
            entry(1, 2000, &["a", "ghost"]),
            entry(50, 2000, &["a", "b"]),
        ];
        let report = SyncReport::compute(&entries, &years(&[("a", 2000), ("b", 2000)]));

        assert!(!report.is_clean());
        assert_eq!(
            report.steps,
            vec![
                StepSync { step: 1, unindexed: 1, orphaned: 1 },
                StepSync { step: 50, unindexed: 0, orphaned: 0 },
            ]
        );
    }

    #[test]
    fn test_check_disjoint() {
        let key = |step, start| PartitionKey { step, start };
        assert!(check_disjoint(&[key(2, 2000), key(2, 2002), key(50, 2000)]).is_ok());
        assert!(check_disjoint(&[key(1, 2000), key(2, 2000), key(2, 2002)]).is_ok());
        assert!(check_disjoint(&[key(2, 1999), key(2, 2000), key(2, 2001)]).is_err());
    }

    #[test]
    fn test_load_requires_index_directory() {
        let dir = tempfile::tempdir().unwrap();
        let vectors = dir.path().join("vectors");
        std::fs::create_dir_all(vectors.join("2000")).unwrap();
        let config = EngineConfig::from_dirs(vectors, dir.path().join("missing"), 4);

        let err = Catalog::load(&config, &[]).err().unwrap();
        assert!(err.to_string().contains("does not exist"));
        assert!(CatalogHandle::load(config, Vec::new()).is_err());
    }

    #[test]
    fn test_from_entries_orders_and_groups() {
        let catalog = Catalog::from_entries(
            vec![entry(50, 2000, &["a"]), entry(1, 2001, &[]), entry(1, 2000, &["a"])],
            years(&[("a", 2000)]),
            Metric::Angular,
            2,
        );
        let keys: Vec<_> = catalog.entries().iter().map(|e| (e.step, e.start)).collect();
        assert_eq!(keys, vec![(1, 2000), (1, 2001), (50, 2000)]);
        assert_eq!(catalog.steps(), vec![1, 50]);
        assert_eq!(catalog.entries_for_step(1).count(), 2);
        assert_eq!(catalog.entries()[2].end(), 2049);
    }
}
