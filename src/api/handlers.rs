//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::warn;

use crate::cache::{LocalCache, Status};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest, SetResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
///
/// `LocalCache` is internally synchronized, so handlers share it by clone.
#[derive(Clone)]
pub struct AppState {
    pub cache: LocalCache<String>,
    /// TTL used when a set request carries none
    pub default_ttl: Duration,
}

impl AppState {
    pub fn new(cache: LocalCache<String>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }
}

/// Runs a cache call that may wait on the pipeline off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Internal(format!("cache task failed: {}", e)))
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl.map(Duration::from_secs).unwrap_or(state.default_ttl);
    let SetRequest { key, value, .. } = req;
    let cache = state.cache;
    let (key, stored) = blocking(move || {
        let stored = cache.set_with_expire(&key, value, ttl);
        (key, stored)
    })
    .await?;
    if !stored {
        warn!("set rejected for key {}", key);
        return Err(CacheError::Rejected(key));
    }

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /get/:key
///
/// Serves stale values inside the grace window, flagged `expired`.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get_with_status(&key) {
        (Some(value), status) if status != Status::NotExist => {
            Ok(Json(GetResponse::new(key, value, status)))
        }
        _ => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let cache = state.cache;
    let key = blocking(move || {
        cache.del(&key);
        key
    })
    .await?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    let cache = state.cache;
    blocking(move || cache.clear()).await?;
    Ok(Json(ClearResponse::cleared()))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
