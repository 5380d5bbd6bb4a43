// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Bounded completion queue connecting callbacks to drain workers
//!
//! Completed buffers cross from the component's delivery thread to a drain
//! worker through a [`CompletionQueue`]: a bounded FIFO paired with a
//! level-triggered ready flag. The producer side never blocks; capacity is
//! sized to the port's buffer count, so a full queue means the exchange
//! protocol itself was violated and the pipeline is faulted.
//!
//! The ready flag is set by every push and cleared only when a pop empties
//! the queue, so a consumer waking from [`CompletionQueue::wait_ready`] is
//! expected to drain until `pop` returns `None`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::buffer::BufferId;
use crate::signal::CancelToken;
use crate::{lock, Error};

/// How often a blocked wait rechecks its cancellation token
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Result of [`CompletionQueue::wait_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The queue has items to drain
    Ready,

    /// The timeout elapsed with nothing to drain
    TimedOut,

    /// The cancellation token was triggered
    Cancelled,

    /// The queue was closed and nothing remains to drain
    Closed,
}

struct Inner {
    items: VecDeque<BufferId>,
    capacity: usize,
    ready: bool,
    closed: bool,
}

/// Bounded FIFO of completed buffers with level-triggered readiness
pub struct CompletionQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl CompletionQueue {
    /// Create a queue holding at most `capacity` completions
    pub fn new(capacity: usize) -> Self {
        CompletionQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                ready: false,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Maximum number of queued completions
    pub fn capacity(&self) -> usize {
        lock(&self.inner).capacity
    }

    /// Resize the bound when a port is populated with its final count
    ///
    /// Only meaningful while the queue is quiet; queued items are kept.
    pub(crate) fn set_capacity(&self, capacity: usize) {
        lock(&self.inner).capacity = capacity;
    }

    /// Number of completions currently queued
    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }

    /// Current level of the ready flag
    pub fn is_ready(&self) -> bool {
        lock(&self.inner).ready
    }

    /// True once the queue has been closed
    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    /// Append a completion and set the ready flag
    ///
    /// Never blocks; this is the callback-context half of the queue. A
    /// full or closed queue is a pipeline fault, not a wait condition.
    pub fn push(&self, id: BufferId) -> Result<(), Error> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(Error::QueueFault("push on closed completion queue"));
        }
        if inner.items.len() >= inner.capacity {
            return Err(Error::QueueFault("completion queue over capacity"));
        }
        inner.items.push_back(id);
        inner.ready = true;
        self.condvar.notify_one();
        Ok(())
    }

    /// Take the oldest completion, clearing the ready flag when the queue
    /// empties
    pub fn pop(&self) -> Option<BufferId> {
        let mut inner = lock(&self.inner);
        let id = inner.items.pop_front();
        if inner.items.is_empty() {
            inner.ready = false;
        }
        id
    }

    /// Block until the queue is ready, cancelled, closed, or timed out
    ///
    /// A pending cancellation wins over readiness. A closed queue still
    /// reports `Ready` while items remain, so the consumer can finish
    /// draining before it sees `Closed`.
    pub fn wait_ready(&self, cancel: &CancelToken, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = lock(&self.inner);
        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if inner.ready {
                return WaitOutcome::Ready;
            }
            if inner.closed {
                return WaitOutcome::Closed;
            }
            let mut slice = WAIT_SLICE;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return WaitOutcome::TimedOut;
                }
                slice = slice.min(deadline - now);
            }
            let (guard, _) = self
                .condvar
                .wait_timeout(inner, slice)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Close the queue and wake every waiter
    ///
    /// Queued items stay poppable; further pushes fail.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = CompletionQueue::new(4);
        for i in 0..4 {
            queue.push(BufferId(i)).unwrap();
        }
        for i in 0..4 {
            assert_eq!(queue.pop(), Some(BufferId(i)));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_over_capacity_faults() {
        let queue = CompletionQueue::new(2);
        queue.push(BufferId(0)).unwrap();
        queue.push(BufferId(1)).unwrap();
        assert!(matches!(
            queue.push(BufferId(2)),
            Err(Error::QueueFault(_))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_set_capacity_raises_the_bound() {
        let queue = CompletionQueue::new(1);
        queue.push(BufferId(0)).unwrap();
        assert!(queue.push(BufferId(1)).is_err());

        queue.set_capacity(2);
        assert_eq!(queue.capacity(), 2);
        queue.push(BufferId(1)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_ready_flag_is_level_triggered() {
        let queue = CompletionQueue::new(4);
        assert!(!queue.is_ready());

        queue.push(BufferId(0)).unwrap();
        queue.push(BufferId(1)).unwrap();
        assert!(queue.is_ready());

        queue.pop();
        assert!(queue.is_ready(), "level holds while items remain");

        queue.pop();
        assert!(!queue.is_ready(), "pop to empty consumes the level");
    }

    #[test]
    fn test_wait_ready_sees_existing_items() {
        let queue = CompletionQueue::new(1);
        queue.push(BufferId(0)).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(
            queue.wait_ready(&cancel, Some(Duration::from_millis(10))),
            WaitOutcome::Ready
        );
    }

    #[test]
    fn test_wait_ready_times_out() {
        let queue = CompletionQueue::new(1);
        let cancel = CancelToken::new();
        assert_eq!(
            queue.wait_ready(&cancel, Some(Duration::from_millis(20))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn test_wait_ready_observes_cancellation() {
        let queue = CompletionQueue::new(1);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(queue.wait_ready(&cancel, None), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_cancellation_wins_over_readiness() {
        let queue = CompletionQueue::new(1);
        queue.push(BufferId(0)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(queue.wait_ready(&cancel, None), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_wait_ready_wakes_on_push() {
        let queue = std::sync::Arc::new(CompletionQueue::new(1));
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(BufferId(3)).unwrap();
        });
        let cancel = CancelToken::new();
        assert_eq!(
            queue.wait_ready(&cancel, Some(Duration::from_secs(5))),
            WaitOutcome::Ready
        );
        assert_eq!(queue.pop(), Some(BufferId(3)));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let queue = CompletionQueue::new(2);
        queue.push(BufferId(0)).unwrap();
        queue.close();

        let cancel = CancelToken::new();
        assert_eq!(queue.wait_ready(&cancel, None), WaitOutcome::Ready);
        assert_eq!(queue.pop(), Some(BufferId(0)));
        assert_eq!(queue.wait_ready(&cancel, None), WaitOutcome::Closed);

        assert!(matches!(queue.push(BufferId(1)), Err(Error::QueueFault(_))));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = std::sync::Arc::new(CompletionQueue::new(1));
        let closer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        let cancel = CancelToken::new();
        assert_eq!(
            queue.wait_ready(&cancel, Some(Duration::from_secs(5))),
            WaitOutcome::Closed
        );
        handle.join().unwrap();
    }
}
