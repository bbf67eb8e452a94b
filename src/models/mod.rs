//! Request and Response models for the cache server API
//!
//! DTOs for the HTTP surface wrapped around a `LocalCache<String>`.

pub mod requests;
pub mod responses;

pub use requests::{SetRequest, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
pub use responses::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, SetResponse, StatsResponse,
};
