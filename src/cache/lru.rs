//! LRU Policy Module
//!
//! Recency ordering for eviction. Nodes live in an index arena (vector plus
//! free list) forming a doubly linked list: head = most recently used,
//! tail = next eviction candidate. Every method expects to be called from the
//! single pipeline worker.

use std::sync::Arc;

use crate::cache::entry::Entry;
use crate::cache::store::ShardedStore;

// == Node Handle ==
/// Stable reference to an arena node. The generation guards against a freed
/// index being reused for a different entry while a stale handle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub(crate) const UNLINKED: u64 = u64::MAX;

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn from_bits(bits: u64) -> Option<Self> {
        if bits == Self::UNLINKED {
            return None;
        }
        Some(Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        })
    }
}

// == Eviction Policy ==
/// Ordering/eviction abstraction driven by the pipeline worker.
pub trait EvictionPolicy<V>: Send {
    /// Links `entry` at the head, or promotes it when already linked.
    /// Returns the entry evicted to make room, if any.
    fn add(&mut self, entry: Arc<Entry<V>>) -> Option<Arc<Entry<V>>>;

    /// Promotes the referenced node to the head.
    fn hit(&mut self, handle: NodeHandle);

    /// Applies `hit` to a batch of handles in order.
    fn push(&mut self, handles: &[NodeHandle]) {
        for handle in handles {
            self.hit(*handle);
        }
    }

    /// Unlinks `entry` and drops its store slot if it still owns it.
    fn del(&mut self, entry: &Arc<Entry<V>>) -> Option<Arc<Entry<V>>>;

    /// Discards the ordering; the caller clears the store.
    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Node<V> {
    entry: Option<Arc<Entry<V>>>,
    prev: Option<u32>,
    next: Option<u32>,
    generation: u32,
}

// == LRU ==
/// Least-recently-used policy over an index arena.
pub struct Lru<V> {
    /// Maximum linked entries, 0 = unbounded
    capacity: usize,
    nodes: Vec<Node<V>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
    store: Arc<ShardedStore<Arc<Entry<V>>>>,
}

impl<V> Lru<V> {
    // == Constructor ==
    pub fn new(capacity: usize, store: Arc<ShardedStore<Arc<Entry<V>>>>) -> Self {
        Self {
            capacity,
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            store,
        }
    }

    fn resolve(&self, handle: NodeHandle) -> Option<u32> {
        let node = self.nodes.get(handle.index as usize)?;
        (node.generation == handle.generation && node.entry.is_some()).then_some(handle.index)
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let node = &self.nodes[index as usize];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n as usize].prev = prev,
            None => self.tail = prev,
        }
        let node = &mut self.nodes[index as usize];
        node.prev = None;
        node.next = None;
    }

    fn link_front(&mut self, index: u32) {
        let old_head = self.head;
        {
            let node = &mut self.nodes[index as usize];
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h as usize].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn move_to_front(&mut self, index: u32) {
        if self.head == Some(index) {
            return;
        }
        self.unlink(index);
        self.link_front(index);
    }

    fn allocate(&mut self, entry: Arc<Entry<V>>) -> NodeHandle {
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.nodes.push(Node {
                    entry: Some(entry),
                    prev: None,
                    next: None,
                    generation: 0,
                });
                (self.nodes.len() - 1) as u32
            }
        };
        NodeHandle::new(index, self.nodes[index as usize].generation)
    }

    /// Unlinks and frees a node, returning its entry.
    fn release(&mut self, index: u32) -> Option<Arc<Entry<V>>> {
        self.unlink(index);
        let node = &mut self.nodes[index as usize];
        let entry = node.entry.take()?;
        node.generation = node.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        entry.clear_node();
        Some(entry)
    }

    // == Evict Tail ==
    /// Pops tails until there is room. A tail whose store slot was already
    /// taken away (explicitly deleted) frees room without being reported.
    fn evict_tail(&mut self) -> Option<Arc<Entry<V>>> {
        while self.len >= self.capacity {
            let tail = self.tail?;
            let entry = self.release(tail)?;
            let removed = self
                .store
                .remove_if(entry.key(), |slot| Arc::ptr_eq(slot, &entry));
            if removed.is_some() {
                return Some(entry);
            }
        }
        None
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = &self.nodes[index as usize];
            if let Some(entry) = &node.entry {
                keys.push(entry.key().to_string());
            }
            cursor = node.next;
        }
        keys
    }
}

impl<V: Send + Sync> EvictionPolicy<V> for Lru<V> {
    fn add(&mut self, entry: Arc<Entry<V>>) -> Option<Arc<Entry<V>>> {
        if let Some(index) = entry.node().and_then(|h| self.resolve(h)) {
            self.move_to_front(index);
            return None;
        }

        // Deleted or replaced before the pipeline reached it.
        let owned = self
            .store
            .get(entry.key())
            .is_some_and(|slot| Arc::ptr_eq(&slot, &entry));
        if !owned {
            return None;
        }

        let evicted = if self.capacity > 0 && self.len >= self.capacity {
            self.evict_tail()
        } else {
            None
        };

        let handle = self.allocate(Arc::clone(&entry));
        self.link_front(handle.index);
        self.len += 1;
        entry.set_node(handle);

        evicted
    }

    fn hit(&mut self, handle: NodeHandle) {
        if let Some(index) = self.resolve(handle) {
            self.move_to_front(index);
        }
    }

    fn del(&mut self, entry: &Arc<Entry<V>>) -> Option<Arc<Entry<V>>> {
        self.store
            .remove_if(entry.key(), |slot| Arc::ptr_eq(slot, entry));
        let index = entry.node().and_then(|h| self.resolve(h))?;
        self.release(index)
    }

    fn clear(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if let Some(entry) = node.entry.take() {
                entry.clear_node();
                node.generation = node.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
            node.prev = None;
            node.next = None;
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }
}
