//! Read Tracker Module
//!
//! Batches "this node was read" notifications so readers never touch the LRU
//! list. Each thread is pinned to one stripe of a small buffer array; a full
//! buffer is handed to the pipeline's access queue in one message. Contended
//! stripes and a full queue both drop the notification: recency is a hint.

use std::cell::Cell;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::cache::lru::NodeHandle;
use crate::cache::stats::Counters;

/// Handles per flushed batch.
pub const DEFAULT_BATCH_SIZE: usize = 16;

static NEXT_STRIPE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE: Cell<Option<usize>> = const { Cell::new(None) };
}

fn stripe_id() -> usize {
    STRIPE.with(|cell| match cell.get() {
        Some(id) => id,
        None => {
            let id = NEXT_STRIPE.fetch_add(1, Ordering::Relaxed);
            cell.set(Some(id));
            id
        }
    })
}

// == Read Buffer ==
pub struct ReadBuffer {
    stripes: Box<[Mutex<Vec<NodeHandle>>]>,
    batch_size: usize,
    sink: Sender<Vec<NodeHandle>>,
    counters: Arc<Counters>,
}

impl ReadBuffer {
    // == Constructor ==
    pub fn new(
        stripes: usize,
        batch_size: usize,
        sink: Sender<Vec<NodeHandle>>,
        counters: Arc<Counters>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let stripes = (0..stripes.max(1))
            .map(|_| Mutex::new(Vec::with_capacity(batch_size)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            stripes,
            batch_size,
            sink,
            counters,
        }
    }

    // == Record ==
    /// Notes one access. Never blocks.
    pub fn record(&self, handle: NodeHandle) {
        let stripe = &self.stripes[stripe_id() % self.stripes.len()];
        let Some(mut buffer) = stripe.try_lock() else {
            return;
        };

        buffer.push(handle);
        if buffer.len() < self.batch_size {
            return;
        }
        let batch = mem::replace(&mut *buffer, Vec::with_capacity(self.batch_size));
        drop(buffer);

        if self.sink.try_send(batch).is_err() {
            self.counters.record_dropped_reads();
            tracing::trace!("access queue full, dropped read batch");
        }
    }
}
