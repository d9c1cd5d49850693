//! Tempora CLI
//!
//! # Usage
//!
//! ```bash
//! # Build step-50 and step-1 indices over a vector directory
//! tempora build --vectors data/vectors --index data/index --dim 2048 --steps 50,1
//!
//! # Serve them
//! tempora serve --vectors data/vectors --index data/index --dim 2048 --port 8080
//!
//! # One-off query without the server
//! tempora query --vectors data/vectors --index data/index --dim 2048 --urn 1234:567
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tempora::catalog::{Catalog, CatalogHandle};
use tempora::codec::normalize_query_identifier;
use tempora::config::{EngineConfig, DEFAULT_N_TREES};
use tempora::model::{IngestRecord, RandomResponse};
use tempora::query::{sample_items, IdentifierQuery, QueryEngine, QueryOptions};
use tempora::server::{serve, AppState, RANDOM_SAMPLE_SIZE};
use tempora::{IndexBuilder, Metric, VectorFormat, VectorStore};

#[derive(Parser)]
#[command(name = "tempora")]
#[command(about = "Year-windowed approximate nearest neighbor search over image feature vectors")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Locations and deployment-wide index settings
#[derive(Args, Clone)]
struct StoreArgs {
    /// Vector root (one directory per year)
    #[arg(long)]
    vectors: PathBuf,

    /// Index root (one directory per step size)
    #[arg(long)]
    index: PathBuf,

    /// Vector dimensionality
    #[arg(long, default_value = "2048")]
    dim: usize,

    /// Distance metric (angular, euclidean, manhattan)
    #[arg(long, default_value = "angular")]
    metric: Metric,

    /// Vector file format (npy, f32)
    #[arg(long, default_value = "npy")]
    format: VectorFormat,
}

impl StoreArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_dirs(self.vectors.clone(), self.index.clone(), self.dim);
        config.metric = self.metric;
        config.format = self.format;
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build one index per (step, window) from the vector store
    Build {
        #[command(flatten)]
        store: StoreArgs,

        /// Step sizes in years
        #[arg(long, value_delimiter = ',', default_value = "50,1")]
        steps: Vec<u32>,

        /// Trees per forest
        #[arg(long, default_value_t = DEFAULT_N_TREES)]
        trees: usize,

        /// Maximum items per leaf
        #[arg(long)]
        leaf_size: Option<usize>,

        /// Seed for reproducible builds
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Start the HTTP server
    Serve {
        #[command(flatten)]
        store: StoreArgs,

        /// Only load these step sizes (all when omitted)
        #[arg(long, value_delimiter = ',')]
        steps: Vec<u32>,

        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Search budget per partition (overrides TEMPORA_SEARCH_K)
        #[arg(long)]
        search_k: Option<usize>,

        /// Per-query timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Query neighbors of a stored item and print the JSON result
    Query {
        #[command(flatten)]
        store: StoreArgs,

        /// Item identifier (resolver URLs are accepted)
        #[arg(long)]
        urn: String,

        /// Neighbors per step
        #[arg(long, value_delimiter = ',')]
        nns: Vec<usize>,

        /// Step sizes, paired with --nns
        #[arg(long, value_delimiter = ',')]
        step: Vec<u32>,

        /// Drop the item from its own results
        #[arg(long)]
        exclude_self: Option<bool>,

        /// Include vectors in the output
        #[arg(long)]
        vectors: bool,

        /// Search budget per partition
        #[arg(long)]
        search_k: Option<usize>,
    },

    /// Print random items from the vector store
    Random {
        #[command(flatten)]
        store: StoreArgs,

        /// Number of items
        #[arg(short, long, default_value_t = RANDOM_SAMPLE_SIZE)]
        n: usize,
    },

    /// Display the loaded partitions and the store sync report
    Stats {
        #[command(flatten)]
        store: StoreArgs,

        /// Only load these step sizes (all when omitted)
        #[arg(long, value_delimiter = ',')]
        steps: Vec<u32>,
    },

    /// Write vector files from a JSON list
    ///
    /// Input format: [{"urn": "1234:567", "year": 1987, "vector": [0.1, ...]}, ...]
    Ingest {
        /// Input JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Vector root to write into
        #[arg(long)]
        vectors: PathBuf,

        /// Vector file format (npy, f32)
        #[arg(long, default_value = "npy")]
        format: VectorFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            store,
            steps,
            trees,
            leaf_size,
            seed,
        } => {
            let mut config = store.config();
            config.n_trees = trees;
            if let Some(leaf_size) = leaf_size {
                config.leaf_size = leaf_size;
            }
            config.seed = seed;

            tracing::info!("Building indices from {:?} into {:?}", config.vector_dir, config.index_dir);
            let report = tokio::task::spawn_blocking(move || {
                IndexBuilder::new(&config).build(config.n_trees, &steps)
            })
            .await??;

            for p in &report.partitions {
                tracing::info!(
                    "step {:>3}  {}..={}  {} items",
                    p.step,
                    p.start,
                    p.end,
                    p.items
                );
            }
            tracing::info!(
                "Built {} partitions over years {}..={}",
                report.partitions.len(),
                report.min_year,
                report.max_year
            );
        }

        Commands::Serve {
            store,
            steps,
            port,
            host,
            search_k,
            timeout_secs,
        } => {
            let mut config = store.config();
            if let Some(k) = search_k {
                config.search_k = k;
            }
            config.query_timeout = Duration::from_secs(timeout_secs);

            tracing::info!("Loading catalog from {:?}", config.index_dir);
            let handle = tokio::task::spawn_blocking(move || CatalogHandle::load(config, steps)).await??;

            let state = Arc::new(AppState::new(handle));
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
            serve(state, addr).await?;
        }

        Commands::Query {
            store,
            urn,
            nns,
            step,
            exclude_self,
            vectors,
            search_k,
        } => {
            let mut config = store.config();
            if let Some(k) = search_k {
                config.search_k = k;
            }

            let mut query = IdentifierQuery::new(normalize_query_identifier(&urn));
            if !nns.is_empty() && !step.is_empty() {
                if nns.len() != step.len() {
                    bail!("--nns has {} values but --step has {}", nns.len(), step.len());
                }
                query = query.with_pairs(step, nns).exclude_self(false);
            }
            if let Some(exclude) = exclude_self {
                query = query.exclude_self(exclude);
            }
            query = query.include_vectors(vectors);

            let catalog = Catalog::load(&config, &query.steps)?;
            let store = config.store();
            let engine = QueryEngine::new(
                &catalog,
                &store,
                QueryOptions {
                    search_k: config.search_k,
                },
            );
            let result = engine.query_by_identifier(&query)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Random { store, n } => {
            let store = store.config().store();
            let years = store
                .year_map()
                .with_context(|| format!("failed to scan {:?}", store.root()))?;
            let response = RandomResponse {
                images: sample_items(&years, n),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Stats { store, steps } => {
            let config = store.config();
            let catalog = Catalog::load(&config, &steps)?;

            println!("Index Directory: {:?}", config.index_dir);
            println!("  Items in store: {}", catalog.years().len());
            println!("  Partitions: {}", catalog.len());
            println!("  Metric: {}", catalog.metric());
            println!("  Dimensions: {}", catalog.dim());
            for entry in catalog.entries() {
                let stats = entry.forest.stats();
                println!(
                    "    step {:>3}  {}..={}  {} items, {} trees, {} nodes",
                    entry.step,
                    entry.start,
                    entry.end(),
                    stats.items,
                    stats.trees,
                    stats.nodes
                );
            }
            println!("  Sync:");
            for s in &catalog.sync_report().steps {
                println!(
                    "    step {:>3}  {} unindexed, {} orphaned",
                    s.step, s.unindexed, s.orphaned
                );
            }
        }

        Commands::Ingest {
            input,
            vectors,
            format,
        } => {
            tracing::info!("Reading vectors from {:?}", input);
            let file = std::fs::File::open(&input)
                .with_context(|| format!("failed to open {:?}", input))?;
            let reader = std::io::BufReader::new(file);
            let records: Vec<IngestRecord> = serde_json::from_reader(reader)?;

            let Some(first) = records.first() else {
                bail!("No vectors found in input");
            };
            let dim = first.vector.len();
            tracing::info!("Found {} vectors of dimension {}", records.len(), dim);

            let store = VectorStore::new(&vectors, format, dim);
            for record in &records {
                store
                    .write_vector(&record.urn, record.year, &record.vector)
                    .with_context(|| format!("failed to write {}", record.urn))?;
            }
            tracing::info!("Wrote {} vector files to {:?}", records.len(), vectors);
        }
    }

    Ok(())
}
