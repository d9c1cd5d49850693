use std::path::PathBuf;
use std::time::Duration;

use tempora_core::forest::DEFAULT_LEAF_SIZE;
use tempora_core::{Metric, VectorFormat};

use crate::layout::IndexLayout;
use crate::store::VectorStore;

pub const DEFAULT_SEARCH_K: usize = 10_000;
pub const DEFAULT_N_TREES: usize = 100;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding [`EngineConfig::search_k`]
pub const SEARCH_K_ENV: &str = "TEMPORA_SEARCH_K";

/// Deployment-wide settings shared by build, load and query
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vector_dir: PathBuf,
    pub index_dir: PathBuf,
    pub dim: usize,
    pub metric: Metric,
    pub format: VectorFormat,
    pub n_trees: usize,
    pub leaf_size: usize,
    pub search_k: usize,
    pub query_timeout: Duration,
    /// Fixed seed for reproducible builds
    pub seed: Option<u64>,
}

impl EngineConfig {
    pub fn from_dirs(vector_dir: PathBuf, index_dir: PathBuf, dim: usize) -> Self {
        Self {
            vector_dir,
            index_dir,
            dim,
            metric: Metric::Angular,
            format: VectorFormat::Npy,
            n_trees: DEFAULT_N_TREES,
            leaf_size: DEFAULT_LEAF_SIZE,
            search_k: search_k_from_env(std::env::var(SEARCH_K_ENV).ok().as_deref())
                .unwrap_or(DEFAULT_SEARCH_K),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            seed: None,
        }
    }

    pub fn store(&self) -> VectorStore {
        VectorStore::new(&self.vector_dir, self.format, self.dim)
    }

    pub fn layout(&self) -> IndexLayout {
        IndexLayout::new(&self.index_dir)
    }
}

fn search_k_from_env(value: Option<&str>) -> Option<usize> {
    let raw = value?;
    match raw.trim().parse::<usize>() {
        Ok(k) if k > 0 => Some(k),
        _ => {
            tracing::warn!("Ignoring invalid {}={:?}", SEARCH_K_ENV, raw);
            None
        }
    }
}
