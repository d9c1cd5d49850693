use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::SyncReport;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub urn: String,
    pub year: i32,
    pub path: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// The item a query was issued for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub urn: String,
    pub year: i32,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// window start → neighbors, closest first
pub type WindowNeighbors = BTreeMap<i32, Vec<Neighbor>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub source: SourceItem,
    /// step → window start → neighbors
    pub neighbors: BTreeMap<u32, WindowNeighbors>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleItem {
    pub urn: String,
    pub year: i32,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomResponse {
    pub images: Vec<SampleItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub items: usize,
    pub partitions: usize,
    pub steps: Vec<u32>,
    pub metric: String,
    pub dimensions: usize,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub partitions: usize,
}

/// Input record for the `ingest` command
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRecord {
    pub urn: String,
    pub year: i32,
    pub vector: Vec<f32>,
}
