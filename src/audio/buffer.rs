//! Bounded blocking ring buffer for timestamped samples
//!
//! The jitter buffer between the network ingestion task and the device
//! callback. Single producer and single consumer are the design, but the
//! locking keeps it safe for more. Enqueue blocks while full (network
//! backpressure), dequeue and peek block while empty; `clear` wakes every
//! waiter so it re-evaluates its predicate, and `close` is the shutdown
//! escape that bounds every blocking point.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::audio::sample::Sample;

struct RingState {
    slots: Vec<Option<Sample>>,
    read_pos: usize,
    write_pos: usize,
    /// Distinguishes full from empty when the cursors coincide
    is_full: bool,
    closed: bool,
}

impl RingState {
    fn len(&self, capacity: usize) -> usize {
        if self.is_full {
            capacity
        } else if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            capacity - self.read_pos + self.write_pos
        }
    }

    fn is_empty(&self, capacity: usize) -> bool {
        self.len(capacity) == 0
    }
}

/// Fixed-capacity FIFO of [`Sample`]s with blocking endpoints
pub struct SampleRing {
    capacity: usize,
    state: Mutex<RingState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl SampleRing {
    /// Create a ring holding up to `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; that is a programmer error, not a
    /// runtime condition.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring capacity must be at least 1");

        Self {
            capacity,
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                read_pos: 0,
                write_pos: 0,
                is_full: false,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `sample` at the tail, blocking while the ring is full.
    ///
    /// Returns `false` without storing anything once the ring is closed.
    pub fn enqueue(&self, sample: Sample) -> bool {
        let mut state = self.lock();
        while state.is_full && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return false;
        }

        let pos = state.write_pos;
        state.slots[pos] = Some(sample);
        state.write_pos = (pos + 1) % self.capacity;
        if state.write_pos == state.read_pos {
            state.is_full = true;
        }
        drop(state);

        self.not_empty.notify_one();
        true
    }

    /// Remove and return the head, blocking while the ring is empty.
    ///
    /// Returns `None` once the ring is closed.
    pub fn dequeue(&self) -> Option<Sample> {
        let mut state = self.lock();
        while state.is_empty(self.capacity) && !state.closed {
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.take_head(state)
    }

    /// Remove and return the head without blocking.
    pub fn try_dequeue(&self) -> Option<Sample> {
        self.take_head(self.lock())
    }

    fn take_head(&self, mut state: MutexGuard<'_, RingState>) -> Option<Sample> {
        if state.is_empty(self.capacity) {
            return None;
        }

        let pos = state.read_pos;
        let sample = state.slots[pos].take();
        state.read_pos = (pos + 1) % self.capacity;
        state.is_full = false;
        drop(state);

        self.not_full.notify_one();
        sample
    }

    /// Return the head without removing it, blocking while empty.
    ///
    /// Returns `None` once the ring is closed.
    pub fn peek(&self) -> Option<Sample> {
        let mut state = self.lock();
        while state.is_empty(self.capacity) && !state.closed {
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.is_empty(self.capacity) {
            return None;
        }
        state.slots[state.read_pos]
    }

    /// Return the head without removing it or blocking.
    pub fn try_peek(&self) -> Option<Sample> {
        let state = self.lock();
        if state.is_empty(self.capacity) {
            None
        } else {
            state.slots[state.read_pos]
        }
    }

    /// Drop all contents and return the ring to its freshly-constructed
    /// state, reopening it if it was closed. Every waiter is woken and
    /// re-evaluates its predicate: a blocked consumer goes back to waiting
    /// on the now-empty ring, a blocked producer proceeds.
    pub fn clear(&self) {
        let mut state = self.lock();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.read_pos = 0;
        state.write_pos = 0;
        state.is_full = false;
        state.closed = false;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Mark the ring terminated until the next [`clear`](Self::clear).
    /// Blocked producers return `false`, blocked consumers `None`; the
    /// contents stay readable via the non-blocking accessors.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
