//! Mutation Pipeline Module
//!
//! The single writer for everything that defines order, eviction and expiry.
//! One thread drains three bounded queues: write ops (set, update, delete,
//! clear, flush) in arrival order, access batches from the read tracker, and
//! fired expiration timers.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, Sender};
use tracing::{debug, info};

use crate::cache::entry::{current_timestamp_ms, Entry};
use crate::cache::expire::ExpireQueue;
use crate::cache::lru::{EvictionPolicy, NodeHandle};
use crate::cache::options::{Callback, Item, ItemFlag};
use crate::cache::stats::Counters;
use crate::cache::store::ShardedStore;
use crate::cache::wheel::TimerId;

/// Pending set/update/delete operations.
pub const WRITE_QUEUE_SIZE: usize = 4096;

/// Pending access batches.
pub const READ_QUEUE_SIZE: usize = 64;

/// Fired timers awaiting the worker.
pub const EXPIRE_QUEUE_SIZE: usize = 1024;

pub(crate) type Store<V> = ShardedStore<Arc<Entry<V>>>;

// == Write Op ==
pub(crate) enum WriteOp<V> {
    /// Link a freshly inserted entry
    Set {
        entry: Arc<Entry<V>>,
        done: Option<Sender<()>>,
    },
    /// Promote an entry rewritten in place and refresh its timer
    Update {
        entry: Arc<Entry<V>>,
        done: Option<Sender<()>>,
    },
    /// Unlink an entry already removed from the store
    Delete {
        entry: Arc<Entry<V>>,
        done: Option<Sender<()>>,
    },
    Clear {
        done: Sender<()>,
    },
    /// Completes once every earlier op has been applied
    Flush {
        done: Sender<()>,
    },
    Shutdown,
}

struct Expired {
    key: String,
    id: TimerId,
}

// == Pipeline ==
/// Worker-side state: only the worker thread ever touches it.
pub(crate) struct Pipeline<V> {
    pub policy: Box<dyn EvictionPolicy<V>>,
    pub store: Arc<Store<V>>,
    pub timers: ExpireQueue,
    pub expire_delay: Duration,
    pub on_delete: Option<Callback<V>>,
    pub on_expire: Option<Callback<V>>,
    pub counters: Arc<Counters>,
}

/// Producer ends handed back to the façade.
pub(crate) struct PipelineHandle<V> {
    pub writes: Sender<WriteOp<V>>,
    pub reads: Sender<Vec<NodeHandle>>,
    pub worker: JoinHandle<()>,
}

impl<V: Clone + Send + Sync + 'static> Pipeline<V> {
    // == Spawn ==
    pub fn spawn(self) -> io::Result<PipelineHandle<V>> {
        let (write_tx, write_rx) = bounded(WRITE_QUEUE_SIZE);
        let (read_tx, read_rx) = bounded(READ_QUEUE_SIZE);

        let worker = thread::Builder::new()
            .name("localcache-pipeline".to_string())
            .spawn(move || self.run(write_rx, read_rx))?;

        Ok(PipelineHandle {
            writes: write_tx,
            reads: read_tx,
            worker,
        })
    }

    fn run(mut self, writes: Receiver<WriteOp<V>>, reads: Receiver<Vec<NodeHandle>>) {
        let (expired_tx, expired_rx) = bounded::<Expired>(EXPIRE_QUEUE_SIZE);
        info!("mutation pipeline started");

        loop {
            select! {
                recv(writes) -> op => match op {
                    Ok(WriteOp::Shutdown) | Err(_) => break,
                    Ok(op) => self.apply(op, &expired_tx),
                },
                recv(reads) -> batch => match batch {
                    Ok(batch) => self.policy.push(&batch),
                    Err(_) => break,
                },
                recv(expired_rx) -> fired => {
                    if let Ok(fired) = fired {
                        self.expire(fired, &expired_tx);
                    }
                }
            }
        }

        // A timer blocked on a full queue must see the receiver gone before
        // the wheel thread is joined.
        drop(expired_rx);
        self.timers.stop();
        info!("mutation pipeline stopped");
    }

    fn apply(&mut self, op: WriteOp<V>, expired_tx: &Sender<Expired>) {
        match op {
            WriteOp::Set { entry, done } | WriteOp::Update { entry, done } => {
                self.upsert(entry, expired_tx);
                notify_done(done);
            }
            WriteOp::Delete { entry, done } => {
                self.delete(entry);
                notify_done(done);
            }
            WriteOp::Clear { done } => {
                self.policy.clear();
                self.store.clear();
                self.timers.clear();
                debug!("cache cleared");
                let _ = done.send(());
            }
            WriteOp::Flush { done } => {
                let _ = done.send(());
            }
            WriteOp::Shutdown => {}
        }
    }

    // == Upsert ==
    fn upsert(&mut self, entry: Arc<Entry<V>>, expired_tx: &Sender<Expired>) {
        let evicted = self.policy.add(Arc::clone(&entry));
        // Only the entry the store still holds may own the key's timer.
        let owned = self
            .store
            .get(entry.key())
            .is_some_and(|slot| Arc::ptr_eq(&slot, &entry));
        if owned && entry.node().is_some() {
            self.schedule(&entry, expired_tx);
        }

        if let Some(evicted) = evicted {
            self.timers.remove_owned(evicted.key(), evicted.serial());
            self.counters.record_eviction();
            debug!("lru evicted key {}", evicted.key());
            fire(&self.on_delete, ItemFlag::LruEvict, &evicted);
        }
    }

    fn schedule(&mut self, entry: &Entry<V>, expired_tx: &Sender<Expired>) {
        let key = entry.key().to_string();
        match entry.evict_at(self.expire_delay) {
            Some(at) => {
                let tx = expired_tx.clone();
                let fired_key = key.clone();
                self.timers.update(&key, entry.serial(), at, move |id| {
                    let _ = tx.send(Expired { key: fired_key, id });
                });
            }
            None => {
                self.timers.remove(&key);
            }
        }
    }

    fn delete(&mut self, entry: Arc<Entry<V>>) {
        self.policy.del(&entry);
        // A replacement may already own the key's timer.
        self.timers.remove_owned(entry.key(), entry.serial());
        fire(&self.on_delete, ItemFlag::Delete, &entry);
    }

    // == Expire ==
    fn expire(&mut self, fired: Expired, expired_tx: &Sender<Expired>) {
        let Some(owner) = self.timers.fired(&fired.key, fired.id) else {
            return;
        };
        // A replacement still in the write queue schedules its own timer.
        let Some(entry) = self
            .store
            .get(&fired.key)
            .filter(|entry| entry.serial() == owner)
        else {
            return;
        };

        match entry.evict_at(self.expire_delay) {
            Some(at) if at <= current_timestamp_ms() => {
                if self.policy.del(&entry).is_some() {
                    self.counters.record_expiration();
                    debug!("expired key {}", entry.key());
                    fire(&self.on_expire, ItemFlag::Delete, &entry);
                }
            }
            // Refreshed by an update whose timer change never arrived.
            Some(_) => self.schedule(&entry, expired_tx),
            None => {}
        }
    }
}

fn notify_done(done: Option<Sender<()>>) {
    if let Some(done) = done {
        let _ = done.send(());
    }
}

fn fire<V: Clone>(callback: &Option<Callback<V>>, flag: ItemFlag, entry: &Entry<V>) {
    if let Some(callback) = callback {
        callback(&Item {
            flag,
            key: entry.key().to_string(),
            value: entry.value(),
        });
    }
}
