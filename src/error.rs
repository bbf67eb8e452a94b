//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::fmt;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// `Clone` so every waiter on a coalesced load receives the same error.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The write queue refused the mutation
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// A load operation ran without a configured loader
    #[error("No loader configured")]
    LoaderNotConfigured,

    /// The user-supplied loader failed
    #[error("Load failed: {0}")]
    Load(Arc<anyhow::Error>),

    /// The leading load was dropped before it published a result
    #[error("Load abandoned for key: {0}")]
    LoadAbandoned(String),

    /// A cache with this name is already registered
    #[error("Cache already registered: {0}")]
    AlreadyRegistered(String),
}

impl CacheError {
    /// Wraps a loader failure.
    pub fn load(err: anyhow::Error) -> Self {
        CacheError::Load(Arc::new(err))
    }
}

// == Load Failure ==
/// Error returned by the load-on-miss operations.
///
/// When the key was logically expired the stale value travels with the error,
/// so callers can tell "stale but usable" from "truly absent".
#[derive(Debug)]
pub struct LoadFailure<V> {
    pub error: CacheError,
    pub stale: Option<V>,
}

impl<V> LoadFailure<V> {
    pub fn new(error: CacheError, stale: Option<V>) -> Self {
        Self { error, stale }
    }

    /// True when a stale value is available.
    pub fn is_expired(&self) -> bool {
        self.stale.is_some()
    }

    pub fn into_stale(self) -> Option<V> {
        self.stale
    }
}

impl<V> From<CacheError> for LoadFailure<V> {
    fn from(error: CacheError) -> Self {
        Self { error, stale: None }
    }
}

impl<V> fmt::Display for LoadFailure<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stale.is_some() {
            write!(f, "expired: {}", self.error)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl<V: fmt::Debug> std::error::Error for LoadFailure<V> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Rejected(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            CacheError::Load(_) | CacheError::LoadAbandoned(_) => StatusCode::BAD_GATEWAY,
            CacheError::Internal(_) | CacheError::LoaderNotConfigured => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
