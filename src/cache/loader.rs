//! Load Coordinator Module
//!
//! Coalesces concurrent cache-miss loads: the first caller for a key becomes
//! the leader and runs the load, later callers wait on the leader's published
//! result. The call token lives only while the load is in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{CacheError, Result};

/// Single-key loader configured on the cache.
pub type Loader<V> = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// Batch loader: receives every missed key, returns the pairs it found.
pub type BatchLoader<V> =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, anyhow::Result<HashMap<String, V>>> + Send + Sync>;

type Outcome<V> = Option<Result<V>>;

// == Load Group ==
pub struct LoadGroup<V> {
    calls: Mutex<HashMap<String, watch::Receiver<Outcome<V>>>>,
}

impl<V> Default for LoadGroup<V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the call token when the leader finishes or is dropped.
struct CallToken<'a, V> {
    group: &'a LoadGroup<V>,
    key: &'a str,
}

impl<V> Drop for CallToken<'_, V> {
    fn drop(&mut self) {
        self.group.calls.lock().remove(self.key);
    }
}

impl<V: Clone> LoadGroup<V> {
    pub fn new() -> Self {
        Self::default()
    }

    // == Run ==
    /// Runs `load` unless a load for `key` is already in flight, in which
    /// case `load` is dropped unpolled and the in-flight result is returned.
    pub async fn run<F>(&self, key: &str, load: F) -> Result<V>
    where
        F: Future<Output = Result<V>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        match role {
            Ok(tx) => {
                let _token = CallToken { group: self, key };
                let result = load.await;
                tx.send_replace(Some(result.clone()));
                result
            }
            Err(mut rx) => {
                let outcome = {
                    let published = rx
                        .wait_for(Option::is_some)
                        .await
                        .map_err(|_| CacheError::LoadAbandoned(key.to_string()))?;
                    (*published).clone()
                };
                outcome.unwrap_or_else(|| Err(CacheError::LoadAbandoned(key.to_string())))
            }
        }
    }

    /// Loads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_load_once() {
        let group = Arc::new(LoadGroup::<String>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    group
                        .run("k", async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok("loaded".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "loaded");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_shared_with_waiters() {
        let group = Arc::new(LoadGroup::<u32>::new());

        let leader = {
            let group = Arc::clone(&group);
            tokio::spawn(async move {
                group
                    .run("k", async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(CacheError::load(anyhow::anyhow!("boom")))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let follower = group.run("k", async { Ok(7) }).await;

        assert!(follower.unwrap_err().to_string().contains("boom"));
        assert!(leader.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_sequential_calls_load_again() {
        let group = LoadGroup::<u32>::new();
        assert_eq!(group.run("k", async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(group.run("k", async { Ok(2) }).await.unwrap(), 2);
    }

    #[test]
    fn test_abandoned_leader_releases_waiters() {
        tokio_test::block_on(async {
            let group = LoadGroup::<u32>::new();
            {
                let mut leader = Box::pin(group.run("k", futures::future::pending()));
                assert!(futures::poll!(leader.as_mut()).is_pending());
                assert_eq!(group.in_flight(), 1);
            }
            assert_eq!(group.in_flight(), 0);
            assert_eq!(group.run("k", async { Ok(3) }).await.unwrap(), 3);
        });
    }
}
