// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bounded blocking queue.
//!
//! Backs DecodedQueue, ProcessedQueue and FreePool. A ring
//! buffer guarded by a single `parking_lot::Mutex` with two condition
//! variables, following the same shape as `slain-core`'s frame queue
//! rather than `std::sync::Condvar`, for parking_lot's smaller footprint
//! and fair unparking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Flipped by [`BoundedQueue::interrupt`] so blocked waiters return
    /// early during a flush instead of waiting out their full timeout.
    interrupted: bool,
}

/// Fixed-capacity FIFO queue, both ends blocking with a timeout.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::with_capacity(capacity), capacity, interrupted: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Waits up to `timeout` for capacity, then pushes `item`. Returns
    /// whether the push succeeded.
    pub fn push_back(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();

        while guard.items.len() >= guard.capacity {
            if guard.interrupted {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            let result = self.not_full.wait_for(&mut guard, remaining);
            if result.timed_out() && guard.items.len() >= guard.capacity {
                return false;
            }
        }

        if guard.interrupted {
            return false;
        }

        guard.items.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        true
    }

    /// Symmetric to [`BoundedQueue::push_back`].
    pub fn pop_front(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock();

        while guard.items.is_empty() {
            if guard.interrupted {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let remaining = deadline - now;
            let result = self.not_empty.wait_for(&mut guard, remaining);
            if result.timed_out() && guard.items.is_empty() {
                return None;
            }
        }

        let item = guard.items.pop_front();
        drop(guard);
        self.not_full.notify_one();
        item
    }

    /// Non-blocking pop, used for the controller's opportunistic delivery
    /// attempts.
    pub fn try_pop_front(&self) -> Option<T> {
        self.pop_front(Duration::ZERO)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_full(&self) -> bool {
        let guard = self.inner.lock();
        guard.items.len() >= guard.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Wakes every blocked waiter and makes subsequent pushes/pops fail
    /// until [`BoundedQueue::reset_interrupt`] is called. Used by the flush
    /// protocol.
    pub fn interrupt(&self) {
        self.inner.lock().interrupted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn reset_interrupt(&self) {
        self.inner.lock().interrupted = false;
    }
}
