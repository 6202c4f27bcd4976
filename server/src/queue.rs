//! Blocking FIFO handoff between threads
//!
//! [`BlockingQueue`] is the only channel between the simulation and the
//! network workers: snapshots flow out through one queue per connection, and
//! commands flow in through one queue per game. A queue can be closed exactly
//! once; closing wakes every thread parked in [`BlockingQueue::pop`].

use shared::{CommandCodeDto, Snapshot};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outbound queue owned by one connection's sender worker.
pub type SnapshotQueue = BlockingQueue<Snapshot>;
/// Inbound queue shared by every connection of one game.
pub type CommandQueue = BlockingQueue<CommandCodeDto>;

/// Returned by [`BlockingQueue::push`] on a closed queue; hands the item back.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue is closed")]
pub struct QueueClosed<T>(pub T);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeoutError {
    #[error("timed out waiting for an item")]
    Timeout,
    #[error("queue is closed")]
    Closed,
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer, multi-consumer FIFO.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    // A panicking holder cannot leave `Inner` half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues `item`, or hands it back if the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueClosed(item));
        }
        inner.items.push_back(item);
        drop(inner);

        self.available.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. Returns `None` once the queue is
    /// closed, even if items were still buffered.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return Err(PopTimeoutError::Closed);
            }
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PopTimeoutError::Timeout);
            }
            inner = self
                .available
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Non-blocking pop; `None` when empty or closed.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        inner.items.pop_front()
    }

    /// Closes the queue and wakes all waiters. Calling it again is a no-op.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);

        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
