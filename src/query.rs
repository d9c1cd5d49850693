//! Multi-window, multi-step nearest neighbor queries
//!
//! A query for step `S` fans out to every loaded partition of that step and
//! returns one closest-first list per window, keyed by window start. Queries
//! by identifier resolve the item through the year map first and can drop the
//! item itself from its own results.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tempora_core::ForestError;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogEntry};
use crate::config::DEFAULT_SEARCH_K;
use crate::model::{Neighbor, QueryResult, SampleItem, SourceItem, WindowNeighbors};
use crate::store::{image_path_for, StoreError, VectorStore, YearMap};

/// Steps queried when the caller names none
pub const DEFAULT_STEPS: [u32; 2] = [50, 1];

/// Neighbors per step when the caller names none
pub const DEFAULT_K_PER_STEP: [usize; 2] = [10, 1];

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Identifier not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Index error: {0}")]
    Index(#[from] ForestError),
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => QueryError::NotFound(id),
            StoreError::MissingFile { id, path } => {
                tracing::warn!("Vector for {} missing at {:?}", id, path);
                QueryError::NotFound(id)
            }
            StoreError::DimensionMismatch {
                id,
                expected,
                actual,
            } => QueryError::InvalidRequest(format!(
                "vector for {} has dimension {}, expected {}",
                id, actual, expected
            )),
            other => QueryError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Candidate budget per partition search
    pub search_k: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            search_k: DEFAULT_SEARCH_K,
        }
    }
}

/// Parameters of [`QueryEngine::query_by_identifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierQuery {
    pub identifier: String,
    pub steps: Vec<u32>,
    pub k_per_step: Vec<usize>,
    pub exclude_self: bool,
    pub include_vectors: bool,
}

impl IdentifierQuery {
    /// Default steps and k, excluding the item itself
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            steps: DEFAULT_STEPS.to_vec(),
            k_per_step: DEFAULT_K_PER_STEP.to_vec(),
            exclude_self: true,
            include_vectors: false,
        }
    }

    pub fn with_pairs(mut self, steps: Vec<u32>, k_per_step: Vec<usize>) -> Self {
        self.steps = steps;
        self.k_per_step = k_per_step;
        self
    }

    pub fn exclude_self(mut self, exclude: bool) -> Self {
        self.exclude_self = exclude;
        self
    }

    pub fn include_vectors(mut self, include: bool) -> Self {
        self.include_vectors = include;
        self
    }
}

/// Draw `n` items uniformly (with replacement) from the year map
pub fn sample_items(years: &YearMap, n: usize) -> Vec<SampleItem> {
    let mut rng = rand::thread_rng();
    years
        .sample(&mut rng, n)
        .into_iter()
        .map(|(urn, year)| SampleItem {
            urn: urn.to_string(),
            year,
            path: image_path_for(year, urn),
        })
        .collect()
}

pub struct QueryEngine<'a> {
    catalog: &'a Catalog,
    store: &'a VectorStore,
    options: QueryOptions,
}

impl<'a> QueryEngine<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a VectorStore, options: QueryOptions) -> Self {
        Self {
            catalog,
            store,
            options,
        }
    }

    /// k nearest neighbors of `vector` in every partition of `step`
    pub fn query_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        step: u32,
    ) -> Result<WindowNeighbors, QueryError> {
        if vector.len() != self.catalog.dim() {
            return Err(QueryError::InvalidRequest(format!(
                "Dimension mismatch: expected {}, got {}",
                self.catalog.dim(),
                vector.len()
            )));
        }
        self.search_step(vector, k, step, None, false)
    }

    /// Neighbors of a stored item for each (step, k) pair
    pub fn query_by_identifier(&self, query: &IdentifierQuery) -> Result<QueryResult, QueryError> {
        if query.steps.len() != query.k_per_step.len() {
            return Err(QueryError::InvalidRequest(format!(
                "{} step sizes but {} neighbor counts",
                query.steps.len(),
                query.k_per_step.len()
            )));
        }

        let id = query.identifier.as_str();
        let years = self.catalog.years();
        let year = years
            .year_of(id)
            .ok_or_else(|| QueryError::NotFound(id.to_string()))?;
        let vector = self.store.load_vector(years, id)?;

        let exclude = query.exclude_self.then_some(id);
        let mut neighbors = BTreeMap::new();
        for (&step, &k) in query.steps.iter().zip(&query.k_per_step) {
            let windows = self.search_step(&vector, k, step, exclude, query.include_vectors)?;
            neighbors.insert(step, windows);
        }

        Ok(QueryResult {
            source: SourceItem {
                urn: id.to_string(),
                year,
                image: image_path_for(year, id),
                vector: query.include_vectors.then_some(vector),
            },
            neighbors,
        })
    }

    pub fn random_sample(&self, n: usize) -> Vec<SampleItem> {
        sample_items(self.catalog.years(), n)
    }

    fn search_step(
        &self,
        vector: &[f32],
        k: usize,
        step: u32,
        exclude: Option<&str>,
        include_vectors: bool,
    ) -> Result<WindowNeighbors, QueryError> {
        let entries: Vec<&CatalogEntry> = self.catalog.entries_for_step(step).collect();
        if entries.is_empty() {
            tracing::debug!("No partitions loaded for step {}", step);
        }

        entries
            .par_iter()
            .map(|entry| {
                self.search_entry(entry, vector, k, exclude, include_vectors)
                    .map(|hits| (entry.start, hits))
            })
            .collect()
    }

    fn search_entry(
        &self,
        entry: &CatalogEntry,
        vector: &[f32],
        k: usize,
        exclude: Option<&str>,
        include_vectors: bool,
    ) -> Result<Vec<Neighbor>, QueryError> {
        let request = if exclude.is_some() { k.saturating_add(1) } else { k };
        let hits = entry
            .forest
            .nns_by_vector(vector, request, Some(self.options.search_k))?;

        let years = self.catalog.years();
        let mut neighbors = Vec::with_capacity(hits.len());
        for (item, distance) in hits {
            let urn = &entry.identifiers[item];
            if Some(urn.as_str()) == exclude {
                continue;
            }
            let Some(year) = years.year_of(urn) else {
                tracing::warn!(
                    "Dropping {} from step {} window {}: not in the vector store",
                    urn,
                    entry.step,
                    entry.start
                );
                continue;
            };
            neighbors.push(Neighbor {
                urn: urn.clone(),
                year,
                path: image_path_for(year, urn),
                distance,
                vector: if include_vectors {
                    entry.forest.item_vector(item).map(<[f32]>::to_vec)
                } else {
                    None
                },
            });
        }
        neighbors.truncate(k);
        Ok(neighbors)
    }
}
