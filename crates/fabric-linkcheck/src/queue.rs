//! Priority request queue shared by the pool workers.
//!
//! Requests are served in ascending priority; equal priorities are served in
//! submission order. The lock is only held for heap operations, never across
//! an await.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::TestRequest;

struct Entry {
    priority: i32,
    seq: u64,
    request: TestRequest,
}

impl Entry {
    fn key(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed so the max-heap yields the lowest (priority, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Multi-consumer priority queue of [`TestRequest`]s.
#[derive(Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl RequestQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request. Returns false if the queue is closed.
    pub fn push(&self, request: TestRequest) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry {
                priority: request.priority,
                seq,
                request,
            });
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the next request. Returns `None` once the queue is closed
    /// and empty.
    pub async fn pop(&self) -> Option<TestRequest> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(entry) = state.heap.pop() {
                    return Some(entry.request);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting requests. Waiting consumers drain what is left and
    /// then see `None`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Closes the queue and removes every remaining request, in serving order.
    pub fn drain(&self) -> Vec<TestRequest> {
        let mut state = self.state.lock();
        state.closed = true;
        let mut remaining = Vec::with_capacity(state.heap.len());
        while let Some(entry) = state.heap.pop() {
            remaining.push(entry.request);
        }
        drop(state);
        self.notify.notify_waiters();
        remaining
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
