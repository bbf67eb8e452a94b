//! Expire Queue Module
//!
//! Keyed front over the timing wheel: at most one pending timer per cache key.
//! Owned by the pipeline worker; a fired timer reports back with its id and
//! the worker acknowledges it through [`ExpireQueue::fired`], which drops the
//! bookkeeping only when the id is still the current one for that key.
//! Each timer records the serial of the entry that scheduled it, so a late
//! delete of a replaced entry cannot cancel its successor's timer.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::wheel::{TimerId, TimingWheel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    id: TimerId,
    owner: u64,
}

// == Expire Queue ==
pub struct ExpireQueue {
    wheel: TimingWheel,
    timers: HashMap<String, Pending>,
}

impl ExpireQueue {
    // == Constructor ==
    pub fn start(tick: Duration, slots: usize) -> io::Result<Self> {
        Ok(Self {
            wheel: TimingWheel::start(tick, slots)?,
            timers: HashMap::new(),
        })
    }

    // == Add ==
    /// Schedules `callback` at `fire_at` (Unix milliseconds) on behalf of the
    /// entry with serial `owner`, replacing any timer already held for `key`.
    pub fn add<F>(&mut self, key: &str, owner: u64, fire_at: u64, callback: F) -> TimerId
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        self.remove(key);
        let after = Duration::from_millis(fire_at.saturating_sub(current_timestamp_ms()));
        let id = self.wheel.schedule(after, Box::new(callback));
        self.timers.insert(key.to_string(), Pending { id, owner });
        id
    }

    /// Cancels the current timer for `key` and schedules a new one.
    pub fn update<F>(&mut self, key: &str, owner: u64, fire_at: u64, callback: F) -> TimerId
    where
        F: FnOnce(TimerId) + Send + 'static,
    {
        self.add(key, owner, fire_at, callback)
    }

    /// Cancels and forgets the timer for `key`; no-op when absent.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some(pending) => {
                self.wheel.cancel(pending.id);
                true
            }
            None => false,
        }
    }

    /// Cancels the timer for `key` only if entry `owner` scheduled it.
    pub fn remove_owned(&mut self, key: &str, owner: u64) -> bool {
        match self.timers.get(key) {
            Some(pending) if pending.owner == owner => self.remove(key),
            _ => false,
        }
    }

    // == Fired ==
    /// Acknowledges a fired timer and returns the serial of the entry that
    /// scheduled it. `None` means the timer was superseded after it fired and
    /// the caller must ignore it.
    pub fn fired(&mut self, key: &str, id: TimerId) -> Option<u64> {
        match self.timers.get(key) {
            Some(pending) if pending.id == id => {
                let owner = pending.owner;
                self.timers.remove(key);
                Some(owner)
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancels every timer; the wheel keeps running for new ones.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.wheel.clear();
    }

    /// Cancels every timer and stops the wheel thread.
    pub fn stop(&mut self) {
        self.timers.clear();
        self.wheel.stop();
    }
}
