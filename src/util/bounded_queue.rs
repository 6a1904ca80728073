//! Bounded byte-message queue
//!
//! A capacity-limited FIFO of variable-length byte messages shared between
//! producer and consumer threads. Producers block while the queue is full and
//! consumers block while it is empty, which is the only flow control in the
//! client pipeline.
//!
//! The queue does not interpret the bytes it carries; callers encode and
//! decode their own message layout (see [`crate::protocol`]).
//!
//! # Example
//!
//! ```
//! use ecgpipe::util::bounded_queue::BoundedQueue;
//!
//! let queue = BoundedQueue::new(2);
//! queue.enqueue(b"A".to_vec());
//! queue.enqueue(b"B".to_vec());
//! assert_eq!(queue.size(), 2);
//!
//! assert_eq!(queue.dequeue(16), b"A");
//! assert_eq!(queue.dequeue(16), b"B");
//! ```

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Thread-safe bounded FIFO of byte messages
///
/// All state transitions happen under one mutex. Each transition wakes exactly
/// one waiter on the opposite condition.
#[derive(Debug)]
pub struct BoundedQueue {
    /// Maximum number of queued messages
    capacity: usize,

    /// Queued messages, oldest at the front
    items: Mutex<VecDeque<Vec<u8>>>,

    /// Signalled after a dequeue frees a slot
    room_available: Condvar,

    /// Signalled after an enqueue adds a message
    item_available: Condvar,
}

impl BoundedQueue {
    /// Create an empty queue holding at most `capacity` messages
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 (every enqueue would block forever).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be greater than 0");

        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            room_available: Condvar::new(),
            item_available: Condvar::new(),
        }
    }

    /// Append a message, blocking while the queue is full
    pub fn enqueue(&self, msg: Vec<u8>) {
        let guard = self.lock();
        let mut items = self
            .room_available
            .wait_while(guard, |items| items.len() >= self.capacity)
            .unwrap_or_else(PoisonError::into_inner);

        items.push_back(msg);
        drop(items);

        self.item_available.notify_one();
    }

    /// Remove and return the oldest message, blocking while the queue is empty
    ///
    /// `max_len` is the largest message the caller is prepared to handle.
    ///
    /// # Panics
    ///
    /// Panics with `BufferOverflow` if the dequeued message is longer than
    /// `max_len`. Messages are never truncated.
    pub fn dequeue(&self, max_len: usize) -> Vec<u8> {
        let guard = self.lock();
        let mut items = self
            .item_available
            .wait_while(guard, |items| items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let Some(msg) = items.pop_front() else {
            unreachable!("woke with an empty queue");
        };
        drop(items);

        self.room_available.notify_one();

        assert!(
            msg.len() <= max_len,
            "BufferOverflow: dequeued a {}-byte message into a {}-byte buffer",
            msg.len(),
            max_len
        );

        msg
    }

    /// Number of queued messages
    ///
    /// Advisory only: the value can be stale as soon as it is returned.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    // Push and pop are single calls, so a poisoned deque is still consistent
    fn lock(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
