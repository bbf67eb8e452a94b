//! Local Cache Module
//!
//! Public operation surface. Writes update the entry's visible state at once
//! and then enqueue the structural side effects for the pipeline worker;
//! reads go straight to the sharded store and leave an access note for the
//! read tracker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::entry::{current_timestamp_ms, expire_at_from, Entry, Status};
use crate::cache::expire::ExpireQueue;
use crate::cache::loader::{BatchLoader, LoadGroup, Loader};
use crate::cache::lru::Lru;
use crate::cache::options::CacheBuilder;
use crate::cache::pipeline::{Pipeline, Store, WriteOp};
use crate::cache::ring::ReadBuffer;
use crate::cache::stats::{CacheStats, Counters};
use crate::cache::store::ShardedStore;
use crate::error::{CacheError, LoadFailure, Result};

/// How a submitted write op fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submit {
    Applied,
    Queued,
    Rejected,
    TimedOut,
}

struct Inner<V> {
    store: Arc<Store<V>>,
    reads: ReadBuffer,
    writes: Sender<WriteOp<V>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    loads: LoadGroup<V>,
    counters: Arc<Counters>,
    default_ttl: Duration,
    expire_delay: Duration,
    sync_set_timeout: Option<Duration>,
    sync_delete: bool,
    delete_timeout: Duration,
    loader: Option<Loader<V>>,
    batch_loader: Option<BatchLoader<V>>,
}

impl<V> Inner<V> {
    fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.writes.send(WriteOp::Shutdown);
        if worker.join().is_err() {
            warn!("mutation pipeline panicked");
        }
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// == Local Cache ==
/// Concurrent in-process cache with LRU eviction and TTL expiration.
///
/// Cloning is cheap and every clone shares the same cache.
pub struct LocalCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for LocalCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> LocalCache<V> {
    // == Constructor ==
    pub fn builder() -> CacheBuilder<V> {
        CacheBuilder::new()
    }

    /// Cache bounded to `capacity` entries that never expire.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::builder().capacity(capacity).build()
    }

    pub(crate) fn from_builder(builder: CacheBuilder<V>) -> Result<Self> {
        let delete_timeout = builder.delete_timeout();
        let counters = Arc::new(Counters::new());
        let store: Arc<Store<V>> = Arc::new(ShardedStore::with_shards(builder.shards));

        let timers = ExpireQueue::start(builder.timer_tick, builder.timer_slots)
            .map_err(|e| CacheError::Internal(format!("failed to start timer wheel: {}", e)))?;
        let pipeline = Pipeline {
            policy: Box::new(Lru::new(builder.capacity, Arc::clone(&store))),
            store: Arc::clone(&store),
            timers,
            expire_delay: builder.expire_delay,
            on_delete: builder.on_delete,
            on_expire: builder.on_expire,
            counters: Arc::clone(&counters),
        };
        let handle = pipeline
            .spawn()
            .map_err(|e| CacheError::Internal(format!("failed to start pipeline: {}", e)))?;

        let stripes = std::thread::available_parallelism()
            .map(|n| n.get() * 4)
            .unwrap_or(16);
        let reads = ReadBuffer::new(
            stripes,
            builder.read_batch,
            handle.reads,
            Arc::clone(&counters),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                reads,
                writes: handle.writes,
                worker: Mutex::new(Some(handle.worker)),
                loads: LoadGroup::new(),
                counters,
                default_ttl: builder.default_ttl,
                expire_delay: builder.expire_delay,
                sync_set_timeout: builder.sync_set_timeout,
                sync_delete: builder.sync_delete,
                delete_timeout,
                loader: builder.loader,
                batch_loader: builder.batch_loader,
            }),
        })
    }

    // == Get ==
    /// Returns the value while it is within its TTL.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.get_with_status(key) {
            (value, Status::Exist) => value,
            _ => None,
        }
    }

    /// Returns the value along with its status; stale values come back
    /// flagged `Expired` until the grace delay runs out.
    pub fn get_with_status(&self, key: &str) -> (Option<V>, Status) {
        let inner = &self.inner;
        let Some(entry) = inner.store.get(key) else {
            inner.counters.record_miss();
            return (None, Status::NotExist);
        };

        let (value, status) = entry.snapshot(current_timestamp_ms(), inner.expire_delay);
        match status {
            Status::NotExist => {
                inner.counters.record_miss();
                return (None, status);
            }
            Status::Exist => inner.counters.record_hit(),
            Status::Expired => inner.counters.record_miss(),
        }
        if let Some(handle) = entry.node() {
            inner.reads.record(handle);
        }
        (Some(value), status)
    }

    /// Fresh value without touching stats or recency.
    fn peek(&self, key: &str) -> Option<V> {
        let entry = self.inner.store.get(key)?;
        match entry.snapshot(current_timestamp_ms(), self.inner.expire_delay) {
            (value, Status::Exist) => Some(value),
            _ => None,
        }
    }

    // == Set ==
    /// Stores `value` with the default TTL. Returns false when the pipeline
    /// refused the write or a synchronous wait timed out.
    pub fn set(&self, key: &str, value: V) -> bool {
        self.set_with_expire(key, value, self.inner.default_ttl)
    }

    /// Stores `value` for `ttl`; a zero TTL never expires.
    ///
    /// With a synchronous set timeout this blocks the calling thread; async
    /// callers should move it onto a blocking thread.
    pub fn set_with_expire(&self, key: &str, value: V, ttl: Duration) -> bool {
        self.store_value(key, value, ttl, self.inner.sync_set_timeout)
    }

    /// `wait` bounds the synchronous wait; `None` only enqueues.
    fn store_value(&self, key: &str, value: V, ttl: Duration, wait: Option<Duration>) -> bool {
        let inner = &self.inner;
        let expire_at = expire_at_from(ttl);

        loop {
            let (entry, inserted) = inner.store.get_or_insert_with(key, || {
                Arc::new(Entry::new(key.to_string(), value.clone(), expire_at))
            });

            if inserted {
                let submitted = self.submit(
                    |done| WriteOp::Set {
                        entry: Arc::clone(&entry),
                        done,
                    },
                    wait,
                );
                if submitted == Submit::Rejected {
                    inner
                        .store
                        .remove_if(key, |slot| Arc::ptr_eq(slot, &entry));
                }
                return matches!(submitted, Submit::Applied | Submit::Queued);
            }

            entry.update(value.clone(), expire_at);
            // The pipeline may have evicted the entry under us; retry as an insert.
            let still_owned = inner
                .store
                .get(key)
                .is_some_and(|slot| Arc::ptr_eq(&slot, &entry));
            if still_owned {
                let submitted = self.submit(
                    |done| WriteOp::Update {
                        entry: Arc::clone(&entry),
                        done,
                    },
                    wait,
                );
                return matches!(submitted, Submit::Applied | Submit::Queued);
            }
        }
    }

    fn submit(
        &self,
        make: impl FnOnce(Option<Sender<()>>) -> WriteOp<V>,
        wait: Option<Duration>,
    ) -> Submit {
        let inner = &self.inner;
        let Some(timeout) = wait else {
            return match inner.writes.try_send(make(None)) {
                Ok(()) => Submit::Queued,
                Err(_) => {
                    inner.counters.record_rejected_write();
                    debug!("write queue full, mutation dropped");
                    Submit::Rejected
                }
            };
        };

        let deadline = Instant::now() + timeout;
        let (done_tx, done_rx) = bounded(1);
        if inner.writes.send_timeout(make(Some(done_tx)), timeout).is_err() {
            inner.counters.record_rejected_write();
            debug!("write queue busy past {:?}, mutation dropped", timeout);
            return Submit::Rejected;
        }
        match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(()) => Submit::Applied,
            Err(_) => Submit::TimedOut,
        }
    }

    // == Delete ==
    /// Removes `key`. Visible to readers at once; deletes are never dropped.
    pub fn del(&self, key: &str) {
        let inner = &self.inner;
        let Some(entry) = inner.store.del(key) else {
            return;
        };

        if inner.sync_delete {
            if self.submit(
                |done| WriteOp::Delete { entry, done },
                Some(inner.delete_timeout),
            ) == Submit::TimedOut
            {
                debug!("synchronous delete of {} timed out", key);
            }
        } else if inner
            .writes
            .send(WriteOp::Delete { entry, done: None })
            .is_err()
        {
            debug!("pipeline closed, delete of {} not applied", key);
        }
    }

    // == Load ==
    /// Returns the cached value, loading it with the configured loader on a
    /// miss. Concurrent misses for the same key share one load.
    pub async fn get_with_load(&self, key: &str) -> std::result::Result<V, LoadFailure<V>> {
        let Some(loader) = self.inner.loader.clone() else {
            return Err(CacheError::LoaderNotConfigured.into());
        };
        self.get_with_custom_load(key, move |key| loader(key), self.inner.default_ttl)
            .await
    }

    /// As [`get_with_load`](Self::get_with_load) with a caller-supplied loader
    /// and TTL. If the key was stale and the refresh fails, the stale value is
    /// returned inside the error.
    pub async fn get_with_custom_load<F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> std::result::Result<V, LoadFailure<V>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let stale = match self.get_with_status(key) {
            (Some(value), Status::Exist) => return Ok(value),
            (value, Status::Expired) => value,
            _ => None,
        };

        let loaded = self
            .inner
            .loads
            .run(key, async {
                // Another leader may have filled it between our miss and now.
                if let Some(value) = self.peek(key) {
                    return Ok(value);
                }
                let value = loader(key.to_string()).await.map_err(CacheError::load)?;
                // Never block the executor on the pipeline.
                self.store_value(key, value.clone(), ttl, None);
                Ok(value)
            })
            .await;

        loaded.map_err(|error| LoadFailure::new(error, stale))
    }

    /// Batch variant using the configured batch loader.
    pub async fn mget_with_load(&self, keys: &[&str]) -> Result<HashMap<String, Option<V>>> {
        let loader = self
            .inner
            .batch_loader
            .clone()
            .ok_or(CacheError::LoaderNotConfigured)?;
        self.mget_with_custom_load(keys, move |keys| loader(keys), self.inner.default_ttl)
            .await
    }

    /// Looks up every key, then loads all misses with one loader call. Keys
    /// found in neither place map to `None`.
    pub async fn mget_with_custom_load<F, Fut>(
        &self,
        keys: &[&str],
        loader: F,
        ttl: Duration,
    ) -> Result<HashMap<String, Option<V>>>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = anyhow::Result<HashMap<String, V>>>,
    {
        let mut found = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();
        for key in keys {
            match self.get(key) {
                Some(value) => {
                    found.insert(key.to_string(), Some(value));
                }
                None => misses.push(key.to_string()),
            }
        }
        if misses.is_empty() {
            return Ok(found);
        }

        let loaded = loader(misses.clone()).await.map_err(CacheError::load)?;
        for (key, value) in &loaded {
            self.store_value(key, value.clone(), ttl, None);
        }
        for key in misses {
            let value = loaded.get(&key).cloned();
            found.insert(key, value);
        }
        Ok(found)
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot(self.len())
    }

    // == Clear ==
    /// Drops every entry and pending timer; blocks until the worker has done so.
    pub fn clear(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.inner.writes.send(WriteOp::Clear { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Blocks until every mutation enqueued before the call has been applied.
    pub fn flush(&self) {
        let (done_tx, done_rx) = bounded(1);
        if self.inner.writes.send(WriteOp::Flush { done: done_tx }).is_ok() {
            let _ = done_rx.recv();
        }
    }

    // == Close ==
    /// Stops the pipeline worker and timer wheel. The cache must not be used
    /// afterwards; writes report failure.
    pub fn close(&self) {
        self.inner.shutdown();
    }
}
