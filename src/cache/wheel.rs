//! Timing Wheel Module
//!
//! Hierarchical timing wheel driven by its own thread. Level `i` has `slots`
//! buckets each spanning `slots^i` ticks; levels are added on demand and a
//! task cascades toward level 0 as its deadline approaches. Cancellation only
//! drops the task record, stale ids in buckets are skipped when the bucket is
//! drained.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::entry::duration_ms;

pub type TimerId = u64;

/// One-shot callback, receives the id it was scheduled under.
pub type TimerCallback = Box<dyn FnOnce(TimerId) + Send + 'static>;

/// Default tick resolution.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default buckets per level.
pub const DEFAULT_SLOTS: usize = 60;

struct Task {
    deadline: u64,
    callback: TimerCallback,
}

// == Wheel State ==
struct WheelState {
    slots: u64,
    /// Ticks elapsed since the wheel started
    current: u64,
    levels: Vec<Vec<Vec<TimerId>>>,
    tasks: HashMap<TimerId, Task>,
    next_id: TimerId,
}

impl WheelState {
    fn new(slots: usize) -> Self {
        let slots = slots.max(2);
        Self {
            slots: slots as u64,
            current: 0,
            levels: vec![vec![Vec::new(); slots]],
            tasks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Ticks covered by one bucket of `level`.
    fn span(&self, level: usize) -> u64 {
        self.slots.saturating_pow(level as u32)
    }

    fn place(&mut self, id: TimerId, deadline: u64) {
        let delta = deadline.saturating_sub(self.current).max(1);
        let mut level = 0;
        // A saturated span already covers every remaining deadline.
        while self.span(level) < u64::MAX && delta >= self.span(level + 1) {
            level += 1;
        }
        while self.levels.len() <= level {
            self.levels.push(vec![Vec::new(); self.slots as usize]);
        }
        let bucket = (deadline / self.span(level)) % self.slots;
        self.levels[level][bucket as usize].push(id);
    }

    fn insert(&mut self, deadline: u64, callback: TimerCallback) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        // Never due on the current tick: it has already been drained.
        let deadline = deadline.max(self.current + 1);
        self.tasks.insert(id, Task { deadline, callback });
        self.place(id, deadline);
        id
    }

    // == Advance ==
    /// Moves one tick forward and returns the tasks that became due.
    fn tick(&mut self, due: &mut Vec<(TimerId, TimerCallback)>) {
        self.current += 1;

        for level in (1..self.levels.len()).rev() {
            let span = self.span(level);
            if self.current % span != 0 {
                continue;
            }
            let bucket = ((self.current / span) % self.slots) as usize;
            let ids = mem::take(&mut self.levels[level][bucket]);
            for id in ids {
                let Some(deadline) = self.tasks.get(&id).map(|t| t.deadline) else {
                    continue;
                };
                if deadline <= self.current {
                    if let Some(task) = self.tasks.remove(&id) {
                        due.push((id, task.callback));
                    }
                } else {
                    self.place(id, deadline);
                }
            }
        }

        let bucket = (self.current % self.slots) as usize;
        let ids = mem::take(&mut self.levels[0][bucket]);
        for id in ids {
            let Some(deadline) = self.tasks.get(&id).map(|t| t.deadline) else {
                continue;
            };
            if deadline <= self.current {
                if let Some(task) = self.tasks.remove(&id) {
                    due.push((id, task.callback));
                }
            } else {
                self.place(id, deadline);
            }
        }
    }

    fn advance_to(&mut self, target: u64) -> Vec<(TimerId, TimerCallback)> {
        let mut due = Vec::new();
        if self.tasks.is_empty() {
            // Every bucketed id is stale; skip ahead.
            self.clear_buckets();
            self.current = self.current.max(target);
            return due;
        }
        while self.current < target {
            self.tick(&mut due);
        }
        due
    }

    fn clear_buckets(&mut self) {
        for level in self.levels.iter_mut() {
            for bucket in level.iter_mut() {
                bucket.clear();
            }
        }
    }
}

// == Timing Wheel ==
pub struct TimingWheel {
    state: Arc<Mutex<WheelState>>,
    tick: Duration,
    started: Instant,
    stop_tx: Option<Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl TimingWheel {
    // == Constructor ==
    /// Starts the wheel and its driver thread.
    pub fn start(tick: Duration, slots: usize) -> io::Result<Self> {
        let tick = tick.max(Duration::from_millis(1));
        let state = Arc::new(Mutex::new(WheelState::new(slots)));
        let started = Instant::now();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let tick_ms = duration_ms(tick);
        let driver_state = Arc::clone(&state);
        let driver = thread::Builder::new()
            .name("localcache-timer".to_string())
            .spawn(move || {
                info!("timer wheel started with tick {:?}", tick);
                loop {
                    let next = {
                        let state = driver_state.lock();
                        Duration::from_millis(tick_ms.saturating_mul(state.current + 1))
                    };
                    let wait = next.saturating_sub(started.elapsed());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    let target = duration_ms(started.elapsed()) / tick_ms;
                    let due = driver_state.lock().advance_to(target);
                    // Callbacks run without the wheel lock held.
                    for (id, callback) in due {
                        callback(id);
                    }
                }
                info!("timer wheel stopped");
            })?;

        Ok(Self {
            state,
            tick,
            started,
            stop_tx: Some(stop_tx),
            driver: Some(driver),
        })
    }

    // == Schedule ==
    /// Runs `callback` once, no earlier than `after` from now.
    pub fn schedule(&self, after: Duration, callback: TimerCallback) -> TimerId {
        let at = self.started.elapsed().saturating_add(after);
        let tick_ms = self.tick.as_millis();
        let deadline = u64::try_from(at.as_millis().div_ceil(tick_ms)).unwrap_or(u64::MAX);
        self.state.lock().insert(deadline, callback)
    }

    /// Returns false when the timer already fired or was cancelled.
    pub fn cancel(&self, id: TimerId) -> bool {
        self.state.lock().tasks.remove(&id).is_some()
    }

    /// Cancels every pending timer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.tasks.clear();
        state.clear_buckets();
    }

    /// Pending timers.
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn levels(&self) -> usize {
        self.state.lock().levels.len()
    }

    // == Stop ==
    /// Cancels pending timers and joins the driver thread.
    pub fn stop(&mut self) {
        self.clear();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                debug!("timer driver panicked");
            }
        }
    }
}

impl Drop for TimingWheel {
    fn drop(&mut self) {
        self.stop();
    }
}
