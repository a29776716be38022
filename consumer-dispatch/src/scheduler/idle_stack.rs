// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use parking_lot::Mutex;
use smallvec::SmallVec;

/// LIFO of schedule queue indices that currently have no pending work.
///
/// The most recently drained queue is handed out first, since its thread is
/// the most likely to still be parked and ready.
#[derive(Debug)]
pub struct IdleStack {
    capacity: usize,
    slots: Mutex<SmallVec<[usize; 16]>>,
}

impl IdleStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(SmallVec::with_capacity(capacity)),
        }
    }

    /// Pushes `queue` unless it is already on the stack.
    ///
    /// Returns `true` if the queue was added.
    pub fn push(&self, queue: usize) -> bool {
        let mut slots = self.slots.lock();
        if slots.contains(&queue) {
            return false;
        }
        debug_assert!(slots.len() < self.capacity, "idle stack overflow");
        slots.push(queue);
        true
    }

    pub fn pop(&self) -> Option<usize> {
        self.slots.lock().pop()
    }

    pub fn contains(&self, queue: usize) -> bool {
        self.slots.lock().contains(&queue)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bottom to top.
    pub fn snapshot(&self) -> Vec<usize> {
        self.slots.lock().to_vec()
    }
}
