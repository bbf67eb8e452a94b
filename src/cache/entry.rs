//! Cache Entry Module
//!
//! Defines the shared record for one cached key. The value and its expiry stamp
//! sit behind the entry's own lock so the façade can rewrite them in place while
//! the pipeline worker only ever touches the entry's position in the LRU list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::cache::lru::NodeHandle;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

// == Status ==
/// Classification of a key at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No live entry for the key
    NotExist,
    /// Entry present and within its TTL
    Exist,
    /// TTL elapsed but still inside the grace delay; value is stale
    Expired,
}

impl Status {
    /// Short lowercase label used by the HTTP surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotExist => "not_exist",
            Status::Exist => "exist",
            Status::Expired => "expired",
        }
    }
}

#[derive(Debug)]
struct EntryState<V> {
    value: V,
    /// Logical expiry (Unix milliseconds), None = never expires
    expire_at: Option<u64>,
}

// == Entry ==
/// One cached record shared between readers and the pipeline worker.
#[derive(Debug)]
pub struct Entry<V> {
    key: String,
    /// Process-unique; tells a replacement apart from the entry it replaced
    serial: u64,
    state: RwLock<EntryState<V>>,
    /// Packed `NodeHandle`, written only by the pipeline worker
    node: AtomicU64,
}

impl<V> Entry<V> {
    // == Constructor ==
    /// Creates an unlinked entry.
    pub fn new(key: String, value: V, expire_at: Option<u64>) -> Self {
        Self {
            key,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            state: RwLock::new(EntryState { value, expire_at }),
            node: AtomicU64::new(NodeHandle::UNLINKED),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Rewrites value and expiry under the entry lock.
    pub fn update(&self, value: V, expire_at: Option<u64>) {
        let mut state = self.state.write();
        state.value = value;
        state.expire_at = expire_at;
    }

    pub fn expire_at(&self) -> Option<u64> {
        self.state.read().expire_at
    }

    /// Instant after which the entry must be physically removed.
    pub fn evict_at(&self, delay: Duration) -> Option<u64> {
        self.expire_at()
            .map(|at| at.saturating_add(duration_ms(delay)))
    }

    // == Node Handle ==
    pub(crate) fn node(&self) -> Option<NodeHandle> {
        NodeHandle::from_bits(self.node.load(Ordering::Acquire))
    }

    pub(crate) fn set_node(&self, handle: NodeHandle) {
        self.node.store(handle.to_bits(), Ordering::Release);
    }

    pub(crate) fn clear_node(&self) {
        self.node.store(NodeHandle::UNLINKED, Ordering::Release);
    }
}

impl<V: Clone> Entry<V> {
    pub fn value(&self) -> V {
        self.state.read().value.clone()
    }

    // == Snapshot ==
    /// Reads the value and classifies it against `now`.
    ///
    /// Boundary condition: the entry is `Expired` once `now >= expire_at` and
    /// becomes `NotExist` once `now >= expire_at + delay`, even when the timer
    /// has not removed it yet.
    pub fn snapshot(&self, now: u64, delay: Duration) -> (V, Status) {
        let state = self.state.read();
        let status = match state.expire_at {
            None => Status::Exist,
            Some(at) if now < at => Status::Exist,
            Some(at) if now < at.saturating_add(duration_ms(delay)) => Status::Expired,
            Some(_) => Status::NotExist,
        };
        (state.value.clone(), status)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Absolute expiry stamp for a TTL starting now; a zero TTL never expires.
pub fn expire_at_from(ttl: Duration) -> Option<u64> {
    if ttl.is_zero() {
        None
    } else {
        Some(current_timestamp_ms().saturating_add(duration_ms(ttl)))
    }
}
