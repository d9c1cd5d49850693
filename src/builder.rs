//! Offline index construction
//!
//! For every step size the year range `[min_year, max_year]` is cut into
//! consecutive windows of `step` years starting at `min_year`. The last window
//! keeps its full width even when it runs past `max_year`. Each window gets
//! one forest over the vectors whose year it covers, inserted in storage path
//! order, plus an identifier list mapping internal index → identifier.
//!
//! Windows are independent and are built in parallel.

use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tempora_core::{Forest, Metric};

use crate::config::EngineConfig;
use crate::layout::{write_atomic, IndexLayout};
use crate::store::{Discovery, VectorStore};

/// A contiguous closed year range `[start, start + step - 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub step: u32,
    pub start: i32,
}

impl Window {
    pub fn end(&self) -> i32 {
        (self.start as i64 + self.step as i64 - 1).min(i32::MAX as i64) as i32
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end()
    }
}

/// Windows of width `step` tiling `[min_year, max_year]`
pub fn windows(min_year: i32, max_year: i32, step: u32) -> Vec<Window> {
    if step == 0 || min_year > max_year {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut start = min_year as i64;
    while start <= max_year as i64 {
        out.push(Window {
            step,
            start: start as i32,
        });
        start += step as i64;
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    pub step: u32,
    pub start: i32,
    pub end: i32,
    pub items: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub min_year: i32,
    pub max_year: i32,
    pub partitions: Vec<PartitionReport>,
}

impl BuildReport {
    pub fn total_items(&self, step: u32) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.step == step)
            .map(|p| p.items)
            .sum()
    }
}

pub struct IndexBuilder {
    store: VectorStore,
    layout: IndexLayout,
    metric: Metric,
    leaf_size: usize,
    seed: Option<u64>,
}

impl IndexBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: config.store(),
            layout: config.layout(),
            metric: config.metric,
            leaf_size: config.leaf_size,
            seed: config.seed,
        }
    }

    /// Build and persist one forest per (step, window)
    ///
    /// Existing files for the same (step, start) are overwritten, and files
    /// of a rebuilt step that fall outside the new window grid are removed.
    pub fn build(&self, n_trees: usize, steps: &[u32]) -> Result<BuildReport> {
        if n_trees == 0 {
            bail!("n_trees must be > 0");
        }
        if let Some(step) = steps.iter().find(|&&s| s == 0) {
            bail!("invalid step size {}", step);
        }
        let steps: BTreeSet<u32> = steps.iter().copied().collect();

        let discovery = self
            .store
            .discover()
            .with_context(|| format!("failed to scan vector store {:?}", self.store.root()))?;
        let (min_year, max_year) = discovery
            .year_range()
            .ok_or_else(|| anyhow!("no year directories found in {:?}", self.store.root()))?;

        tracing::info!(
            "Building {} trees per window over {} vectors, years {}..={}",
            n_trees,
            discovery.entries.len(),
            min_year,
            max_year
        );

        let mut jobs = Vec::new();
        for &step in &steps {
            let dir = self.layout.step_dir(step);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create index directory {:?}", dir))?;
            jobs.extend(windows(min_year, max_year, step));
        }

        let mut partitions = jobs
            .par_iter()
            .map(|window| self.build_window(&discovery, *window, n_trees))
            .collect::<Result<Vec<_>>>()?;
        partitions.sort_by_key(|p| (p.step, p.start));

        // A shifted year range moves the window grid; drop the old grid's files.
        for &step in &steps {
            let keep: BTreeSet<i32> = partitions
                .iter()
                .filter(|p| p.step == step)
                .map(|p| p.start)
                .collect();
            let removed = self.layout.remove_stale(step, &keep)?;
            if !removed.is_empty() {
                tracing::info!("Removed {} stale step {} window(s): {:?}", removed.len(), step, removed);
            }
        }

        Ok(BuildReport {
            min_year,
            max_year,
            partitions,
        })
    }

    fn build_window(
        &self,
        discovery: &Discovery,
        window: Window,
        n_trees: usize,
    ) -> Result<PartitionReport> {
        let members: Vec<_> = discovery.in_years(window.start, window.end()).collect();
        tracing::info!(
            "indexing {} year(s) from {} ({} items)",
            window.step,
            window.start,
            members.len()
        );

        let forest = match self.seed {
            Some(seed) => Forest::new_with_seed(
                self.store.dim(),
                self.metric,
                window_seed(seed, window),
            ),
            None => Forest::new(self.store.dim(), self.metric),
        };
        let mut forest = forest.with_leaf_size(self.leaf_size);

        for (i, member) in members.iter().enumerate() {
            let vector = self
                .store
                .read_file(&member.identifier, &member.path)
                .with_context(|| format!("failed to load vector {:?}", member.path))?;
            forest.add_item(i, &vector)?;
        }
        forest
            .build(n_trees)
            .with_context(|| format!("failed to build window {:?}", window))?;

        // Identifiers first: an index file is never visible without its list.
        let identifiers: Vec<&str> = members.iter().map(|m| m.identifier.as_str()).collect();
        let ids_path = self.layout.identifiers_path(window.step, window.start);
        write_atomic(&ids_path, &serde_json::to_vec(&identifiers)?)?;

        let index_path = self.layout.index_path(window.step, window.start);
        forest
            .save(&index_path)
            .with_context(|| format!("failed to save index {:?}", index_path))?;

        Ok(PartitionReport {
            step: window.step,
            start: window.start,
            end: window.end(),
            items: members.len(),
        })
    }
}

fn window_seed(seed: u64, window: Window) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ ((window.step as u64) << 32) ^ (window.start as u32 as u64)
}
