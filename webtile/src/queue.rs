//! Priority queue of pending requests.
//!
//! Requests are ordered by priority byte (higher values first), then by
//! enqueue order (FIFO within the same priority level), so interactive
//! submissions preempt demoted retries. The queue is shared between the
//! protocol gateway (producer) and the request processor (consumer); a single
//! mutex protects the heap and a [`Notify`] wakes the consumer.
//!
//! The wake-up path is race-free: `notify_one` on an empty waiter set stores a
//! permit, so a request enqueued between the consumer's emptiness check and
//! its `await` is still observed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::stats::StatsReporter;

/// A request waiting to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedRequest {
    /// Priority byte (higher dequeues first).
    priority: u8,
    /// Sequence number for FIFO ordering within a priority level.
    sequence: u64,
    /// Request text with the priority byte already removed.
    text: String,
}

// Max-heap ordering: higher priority first, then lower sequence (older) first.
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            order => order,
        }
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Thread-safe priority queue of pending request texts.
///
/// Every mutation reports the updated pending count to the stats channel.
pub struct RequestQueue {
    heap: Mutex<BinaryHeap<QueuedRequest>>,
    notify: Notify,
    sequence: AtomicU64,
    stats: StatsReporter,
}

impl RequestQueue {
    pub fn new(stats: StatsReporter) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            stats,
        }
    }

    /// Appends a request and wakes one waiting consumer.
    pub fn push(&self, priority: u8, text: impl Into<String>) {
        let entry = QueuedRequest {
            priority,
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            text: text.into(),
        };

        let pending = {
            let mut heap = self.heap.lock();
            heap.push(entry);
            heap.len()
        };

        self.notify.notify_one();
        self.stats.report(pending);
    }

    /// Removes and returns the highest-priority request text.
    ///
    /// Ties are broken in favor of the earliest-inserted entry.
    pub fn try_pop(&self) -> Option<String> {
        let (entry, pending) = {
            let mut heap = self.heap.lock();
            let entry = heap.pop()?;
            (entry, heap.len())
        };

        self.stats.report(pending);
        Some(entry.text)
    }

    /// Waits until a producer signals a new request.
    ///
    /// A signal that arrived while no consumer was waiting is buffered, so
    /// callers may check the queue first and then wait without losing wake-ups.
    pub async fn wait_for_request(&self) {
        self.notify.notified().await;
    }

    /// Atomically removes every entry whose text contains `requester`.
    ///
    /// Survivors keep their sequence numbers, preserving their relative order.
    /// Returns the number of entries removed.
    pub fn remove_matching(&self, requester: &str) -> usize {
        let (removed, pending) = {
            let mut heap = self.heap.lock();
            let before = heap.len();
            let survivors: Vec<_> = heap
                .drain()
                .filter(|entry| !entry.text.contains(requester))
                .collect();
            let removed = before - survivors.len();
            *heap = BinaryHeap::from(survivors);
            (removed, heap.len())
        };

        self.stats.report(pending);
        removed
    }

    /// Returns the number of pending requests.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Returns the priority bytes of all pending requests, in arbitrary order.
    pub fn pending_priorities(&self) -> Vec<u8> {
        self.heap.lock().iter().map(|entry| entry.priority).collect()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .finish()
    }
}
