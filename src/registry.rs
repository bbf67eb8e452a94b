//! Cache Registry
//!
//! Named caches registered at process start by the composition root and
//! looked up by the request handlers.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::{CacheBuilder, LocalCache};
use crate::error::{CacheError, Result};

// == Cache Registry ==
pub struct CacheRegistry<V> {
    caches: RwLock<HashMap<String, LocalCache<V>>>,
}

impl<V> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CacheRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and registers a cache under `name`.
    pub fn register(&self, name: &str, builder: CacheBuilder<V>) -> Result<LocalCache<V>> {
        let mut caches = self.caches.write();
        if caches.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        let cache = builder.build()?;
        caches.insert(name.to_string(), cache.clone());
        info!("registered cache {} ({} total)", name, caches.len());
        Ok(cache)
    }

    pub fn get(&self, name: &str) -> Option<LocalCache<V>> {
        self.caches.read().get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Closes and forgets every cache.
    pub fn close_all(&self) {
        let caches: Vec<_> = self.caches.write().drain().collect();
        for (name, cache) in caches {
            cache.close();
            info!("closed cache {}", name);
        }
    }
}
