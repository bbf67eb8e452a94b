//! API Module
//!
//! HTTP handlers and routing for the cache server.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value and its status
//! - `DELETE /del/:key` - Delete a key
//! - `POST /clear` - Drop every entry
//! - `GET /stats` - Cache statistics
//! - `GET /health` - Health check

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
