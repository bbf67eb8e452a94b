//! Local Cache - An embedded concurrent in-memory cache
//!
//! Provides LRU eviction, TTL expiration with a stale-serving grace window,
//! and coalesced load-on-miss, plus a small HTTP server around it.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod registry;

pub use api::AppState;
pub use cache::{CacheBuilder, LocalCache, Status};
pub use config::Config;
pub use error::{CacheError, LoadFailure};
pub use registry::CacheRegistry;
