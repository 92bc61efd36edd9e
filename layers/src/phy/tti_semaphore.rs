//! FIFO transmit ordering
//!
//! Workers finish their subframes in any order; `TtiSemaphore` releases them
//! to the radio strictly in the order their ids were pushed.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt::Debug;

/// Ordered sequence of pending transmit tickets
#[derive(Debug)]
pub struct TtiSemaphore<T> {
    fifo: Mutex<VecDeque<T>>,
    cvar: Condvar,
}

impl<T> Default for TtiSemaphore<T> {
    fn default() -> Self {
        Self {
            fifo: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
        }
    }
}

impl<T: Copy + PartialEq + Debug> TtiSemaphore<T> {
    /// Create an empty semaphore
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` to the back of the sequence. Never blocks.
    pub fn push(&self, id: T) {
        let mut fifo = self.fifo.lock();
        debug_assert!(!fifo.contains(&id), "ticket {:?} pushed twice", id);
        fifo.push_back(id);
    }

    /// Block until `id` is at the front of the sequence
    ///
    /// Returns immediately when the sequence is empty.
    pub fn wait(&self, id: T) {
        let mut fifo = self.fifo.lock();
        debug_assert!(fifo.is_empty() || fifo.contains(&id), "waiting for unknown ticket {:?}", id);
        while fifo.front().is_some_and(|front| *front != id) {
            self.cvar.wait(&mut fifo);
        }
    }

    /// Pop the front ticket and wake every waiter
    pub fn release(&self) {
        let mut fifo = self.fifo.lock();
        let released = fifo.pop_front();
        debug_assert!(released.is_some(), "release with no pending ticket");
        self.cvar.notify_all();
    }

    /// Block until no ticket is pending
    pub fn wait_all(&self) {
        let mut fifo = self.fifo.lock();
        while !fifo.is_empty() {
            self.cvar.wait(&mut fifo);
        }
    }

    /// Number of pending tickets
    pub fn len(&self) -> usize {
        self.fifo.lock().len()
    }

    /// True when no ticket is pending
    pub fn is_empty(&self) -> bool {
        self.fifo.lock().is_empty()
    }
}
