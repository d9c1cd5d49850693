//! HTTP server for Tempora
//!
//! # Endpoints
//!
//! - `GET /query?urn=<id>[&nns=<k,..>&step=<S,..>][&vectors=<bool>][&exclude_self=<bool>]`
//! - `GET /random` - ten random items
//! - `GET /health` - catalog summary and sync report
//! - `POST /reload` - rebuild the catalog from disk and swap it in

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::CatalogHandle;
use crate::codec::normalize_query_identifier;
use crate::model::{ErrorBody, HealthResponse, RandomResponse, ReloadResponse};
use crate::query::{IdentifierQuery, QueryEngine, QueryError, QueryOptions};
use crate::store::VectorStore;

/// Items returned by `/random`
pub const RANDOM_SAMPLE_SIZE: usize = 10;

/// Shared application state
///
/// Queries take a snapshot of the current catalog and never block on a
/// reload in progress.
pub struct AppState {
    pub catalog: CatalogHandle,
    pub store: VectorStore,
    pub options: QueryOptions,
    pub query_timeout: Duration,
}

impl AppState {
    pub fn new(catalog: CatalogHandle) -> Self {
        let config = catalog.config();
        Self {
            store: config.store(),
            options: QueryOptions {
                search_k: config.search_k,
            },
            query_timeout: config.query_timeout,
            catalog,
        }
    }
}

/// Raw `/query` parameters
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub urn: Option<String>,
    pub nns: Option<String>,
    pub step: Option<String>,
    pub vectors: Option<String>,
    pub exclude_self: Option<String>,
}

impl QueryParams {
    /// Explicit `nns` + `step` lists select the (step, k) pairs and keep the
    /// item in its own results unless told otherwise. With either missing the
    /// default pairs apply and the item is excluded.
    pub fn into_query(self) -> Result<IdentifierQuery, QueryError> {
        let urn = self
            .urn
            .as_deref()
            .map(normalize_query_identifier)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| QueryError::InvalidRequest("missing urn".into()))?;

        let mut query = IdentifierQuery::new(urn);
        if let (Some(nns), Some(step)) = (&self.nns, &self.step) {
            let k_per_step: Vec<usize> = parse_list(nns, "nns")?;
            let steps: Vec<u32> = parse_list(step, "step")?;
            if steps.len() != k_per_step.len() {
                return Err(QueryError::InvalidRequest(format!(
                    "nns has {} values but step has {}",
                    k_per_step.len(),
                    steps.len()
                )));
            }
            if steps.contains(&0) {
                return Err(QueryError::InvalidRequest("step must be > 0".into()));
            }
            query = query.with_pairs(steps, k_per_step).exclude_self(false);
        }

        if let Some(raw) = &self.exclude_self {
            query = query.exclude_self(parse_bool(raw, "exclude_self")?);
        }
        if let Some(raw) = &self.vectors {
            query = query.include_vectors(parse_bool(raw, "vectors")?);
        }
        Ok(query)
    }
}

fn parse_list<T: FromStr>(raw: &str, name: &str) -> Result<Vec<T>, QueryError> {
    raw.split(',')
        .map(|part| {
            part.trim().parse::<T>().map_err(|_| {
                QueryError::InvalidRequest(format!("invalid {} value {:?}", name, part))
            })
        })
        .collect()
}

pub fn parse_bool(raw: &str, name: &str) -> Result<bool, QueryError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QueryError::InvalidRequest(format!(
            "invalid boolean {:?} for {}",
            raw, name
        ))),
    }
}

fn error_response(status: StatusCode, code: &'static str, message: String) -> Response {
    (status, Json(ErrorBody { code, message })).into_response()
}

fn classify_query_error(err: &QueryError) -> (StatusCode, &'static str) {
    match err {
        QueryError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        QueryError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        QueryError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        QueryError::Index(_) => (StatusCode::INTERNAL_SERVER_ERROR, "index_error"),
    }
}

/// GET /query - neighbors of a stored item
async fn query(State(state): State<Arc<AppState>>, Query(params): Query<QueryParams>) -> Response {
    let request = match params.into_query() {
        Ok(request) => request,
        Err(e) => {
            let (status, code) = classify_query_error(&e);
            return error_response(status, code, e.to_string());
        }
    };

    let timeout = state.query_timeout;
    let state_bg = state.clone();
    let task = tokio::task::spawn_blocking(move || {
        let catalog = state_bg.catalog.current();
        QueryEngine::new(&catalog, &state_bg.store, state_bg.options).query_by_identifier(&request)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(result))) => (StatusCode::OK, Json(result)).into_response(),
        Ok(Ok(Err(e))) => {
            let (status, code) = classify_query_error(&e);
            if status.is_server_error() {
                tracing::error!("Query failed: {}", e);
            }
            error_response(status, code, e.to_string())
        }
        Ok(Err(e)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("query join error: {}", e),
        ),
        Err(_) => {
            tracing::warn!("Query exceeded {:?}", timeout);
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                format!("query exceeded {:?}", timeout),
            )
        }
    }
}

/// GET /random - uniformly sampled items
async fn random(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = state.catalog.current();
    let engine = QueryEngine::new(&catalog, &state.store, state.options);
    Json(RandomResponse {
        images: engine.random_sample(RANDOM_SAMPLE_SIZE),
    })
}

/// GET /health - catalog summary
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let catalog = state.catalog.current();
    let response = HealthResponse {
        status: "ok".to_string(),
        items: catalog.years().len(),
        partitions: catalog.len(),
        steps: catalog.steps(),
        metric: catalog.metric().to_string(),
        dimensions: catalog.dim(),
        sync: catalog.sync_report().clone(),
    };
    (StatusCode::OK, Json(response))
}

/// POST /reload - reload every partition and swap the catalog
async fn reload(State(state): State<Arc<AppState>>) -> Response {
    let state_bg = state.clone();
    let result = tokio::task::spawn_blocking(move || state_bg.catalog.reload()).await;
    let result = match result {
        Ok(inner) => inner,
        Err(e) => Err(anyhow::anyhow!("reload join error: {}", e)),
    };
    match result {
        Ok(catalog) => (
            StatusCode::OK,
            Json(ReloadResponse {
                status: "reloaded".to_string(),
                partitions: catalog.len(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Reload failed: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "reload_failed",
                format!("{:#}", e),
            )
        }
    }
}

/// Create the axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", get(query))
        .route("/random", get(random))
        .route("/health", get(health))
        .route("/reload", post(reload))
        .layer(cors)
        .with_state(state)
}

/// Start the server
pub async fn serve(state: Arc<AppState>, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);

    tracing::info!("Starting Tempora server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
