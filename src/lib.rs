//! Tempora: year-windowed similarity search over image feature vectors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP API (axum)                        │
//! │           GET /query, /random, /health  POST /reload        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        QueryEngine                          │
//! │      fan-out over (step, window) partitions, merge, enrich  │
//! └─────────────────────────────────────────────────────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │   Catalog (arc-swap handle)  │ │        VectorStore         │
//! │ forests + identifier lists   │ │  <year>/<filename>.npy     │
//! └──────────────────────────────┘ └────────────────────────────┘
//!               ▲
//!               │ offline
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       IndexBuilder                          │
//! │   <index>/<step>/<start>.ann + <start>.ids.json per window  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod layout;
pub mod model;
pub mod query;
pub mod server;
pub mod store;

pub use builder::{BuildReport, IndexBuilder, Window};
pub use catalog::{Catalog, CatalogEntry, CatalogHandle, SyncReport};
pub use config::EngineConfig;
pub use layout::IndexLayout;
pub use query::{IdentifierQuery, QueryEngine, QueryError, QueryOptions};
pub use store::{StoreError, VectorStore, YearMap};
pub use tempora_core::{Forest, Metric, VectorFormat};
