//! Cache Module
//!
//! Embedded concurrent cache: sharded store, LRU policy, batched read
//! tracking, timing-wheel expiration, a single-writer mutation pipeline and
//! request-coalescing loads.

mod entry;
mod expire;
mod loader;
mod local;
mod lru;
mod options;
mod pipeline;
mod ring;
mod stats;
mod store;
mod wheel;


// Re-export public types
pub use entry::{current_timestamp_ms, Entry, Status};
pub use expire::ExpireQueue;
pub use loader::{BatchLoader, LoadGroup, Loader};
pub use local::LocalCache;
pub use lru::{EvictionPolicy, Lru, NodeHandle};
pub use options::{CacheBuilder, Callback, Item, ItemFlag, DEFAULT_CAPACITY, DEFAULT_SYNC_TIMEOUT};
pub use stats::CacheStats;
pub use store::ShardedStore;
pub use wheel::{TimerId, TimingWheel};
