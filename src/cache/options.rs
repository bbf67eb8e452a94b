//! Cache Options Module
//!
//! Builder for [`LocalCache`] construction options.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cache::loader::{BatchLoader, Loader};
use crate::cache::ring::DEFAULT_BATCH_SIZE;
use crate::cache::store::DEFAULT_SHARDS;
use crate::cache::wheel::{DEFAULT_SLOTS, DEFAULT_TICK};
use crate::cache::LocalCache;
use crate::error::Result;

/// Default capacity bound.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Wait bound for synchronous deletes when no set timeout is configured.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(1);

// == Item ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFlag {
    /// Explicit delete or physical expiration
    Delete,
    /// Evicted by the LRU policy
    LruEvict,
}

/// Payload handed to delete/expire callbacks on the pipeline worker.
#[derive(Debug, Clone)]
pub struct Item<V> {
    pub flag: ItemFlag,
    pub key: String,
    pub value: V,
}

/// Callbacks run on the pipeline worker and must not block.
pub type Callback<V> = Arc<dyn Fn(&Item<V>) + Send + Sync>;

// == Cache Builder ==
pub struct CacheBuilder<V> {
    pub(crate) capacity: usize,
    pub(crate) default_ttl: Duration,
    pub(crate) expire_delay: Duration,
    pub(crate) loader: Option<Loader<V>>,
    pub(crate) batch_loader: Option<BatchLoader<V>>,
    pub(crate) sync_set_timeout: Option<Duration>,
    pub(crate) sync_delete: bool,
    pub(crate) on_delete: Option<Callback<V>>,
    pub(crate) on_expire: Option<Callback<V>>,
    pub(crate) timer_tick: Duration,
    pub(crate) timer_slots: usize,
    pub(crate) shards: usize,
    pub(crate) read_batch: usize,
}

impl<V> Default for CacheBuilder<V> {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            default_ttl: Duration::ZERO,
            expire_delay: Duration::ZERO,
            loader: None,
            batch_loader: None,
            sync_set_timeout: None,
            sync_delete: false,
            on_delete: None,
            on_expire: None,
            timer_tick: DEFAULT_TICK,
            timer_slots: DEFAULT_SLOTS,
            shards: DEFAULT_SHARDS,
            read_batch: DEFAULT_BATCH_SIZE,
        }
    }
}

impl<V> fmt::Debug for CacheBuilder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("capacity", &self.capacity)
            .field("default_ttl", &self.default_ttl)
            .field("expire_delay", &self.expire_delay)
            .field("loader", &self.loader.is_some())
            .field("batch_loader", &self.batch_loader.is_some())
            .field("sync_set_timeout", &self.sync_set_timeout)
            .field("sync_delete", &self.sync_delete)
            .field("timer_tick", &self.timer_tick)
            .field("timer_slots", &self.timer_slots)
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheBuilder<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum live entries; 0 means unbounded.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// TTL applied by `set`; zero means entries never expire.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Grace window after logical expiry during which stale values are served.
    pub fn expire_delay(mut self, delay: Duration) -> Self {
        self.expire_delay = delay;
        self
    }

    pub fn loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let loader: Loader<V> =
            Arc::new(move |key: String| -> BoxFuture<'static, anyhow::Result<V>> {
                loader(key).boxed()
            });
        self.loader = Some(loader);
        self
    }

    pub fn batch_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HashMap<String, V>>> + Send + 'static,
    {
        let loader: BatchLoader<V> = Arc::new(
            move |keys: Vec<String>| -> BoxFuture<'static, anyhow::Result<HashMap<String, V>>> {
                loader(keys).boxed()
            },
        );
        self.batch_loader = Some(loader);
        self
    }

    /// Makes `set` wait for the pipeline, bounded by `timeout`.
    /// `None` or a zero timeout keeps sets asynchronous.
    pub fn sync_set_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sync_set_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn sync_delete(mut self, sync: bool) -> Self {
        self.sync_delete = sync;
        self
    }

    pub fn on_delete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Item<V>) + Send + Sync + 'static,
    {
        self.on_delete = Some(Arc::new(callback));
        self
    }

    pub fn on_expire<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Item<V>) + Send + Sync + 'static,
    {
        self.on_expire = Some(Arc::new(callback));
        self
    }

    pub fn timer_tick(mut self, tick: Duration) -> Self {
        self.timer_tick = tick;
        self
    }

    pub fn timer_slots(mut self, slots: usize) -> Self {
        self.timer_slots = slots;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn read_batch(mut self, size: usize) -> Self {
        self.read_batch = size;
        self
    }

    /// Wait bound for synchronous deletes.
    pub(crate) fn delete_timeout(&self) -> Duration {
        self.sync_set_timeout.unwrap_or(DEFAULT_SYNC_TIMEOUT)
    }

    // == Build ==
    /// Starts the pipeline worker and timer wheel.
    pub fn build(self) -> Result<LocalCache<V>> {
        LocalCache::from_builder(self)
    }
}
