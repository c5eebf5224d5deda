// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The bounded admission queue.
//!
//! Items are ordered by `(priority_value, arrival_sequence)`: ascending
//! priority value (Critical first), FIFO within a class. The arrival
//! sequence is a process-local monotonic counter rather than wall-clock, so
//! ordering survives clock steps. A by-id index backs removal,
//! reprioritization and position queries; the index and the ordered map are
//! updated together under one lock, so `depth()` always equals the index
//! size.
//!
//! Every operation is total: failures are `false`/`None`, never panics.

use rocforge_model::{BuildRequest, Priority};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// Composite ordering key: priority value first, arrival sequence second.
type QueueKey = (u16, u64);

#[derive(Default)]
struct QueueInner {
    entries: BTreeMap<QueueKey, BuildRequest>,
    index: HashMap<Uuid, QueueKey>,
}

impl QueueInner {
    fn insert(&mut self, key: QueueKey, request: BuildRequest) {
        let id = request.id;
        let _previous = self.entries.insert(key, request);
        let _previous = self.index.insert(id, key);
    }

    fn remove_by_id(&mut self, id: Uuid) -> Option<(QueueKey, BuildRequest)> {
        let key = self.index.remove(&id)?;
        let request = self.entries.remove(&key)?;
        Some((key, request))
    }
}

/// Bounded priority queue with by-id indexing.
///
/// Clones of the queue are not needed: callers share it behind an `Arc`.
pub struct BuildQueue {
    inner: Mutex<QueueInner>,
    not_empty: Notify,
    max_size: usize,
    next_sequence: AtomicU64,
}

impl BuildQueue {
    /// Creates a queue bounded at `max_size` items.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            not_empty: Notify::new(),
            max_size,
            next_sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Enqueues a request with a fresh arrival sequence. Returns false when
    /// the queue is full or the id is already queued.
    pub async fn enqueue(&self, request: BuildRequest) -> bool {
        let sequence = self.next_sequence();
        self.insert_at(request, sequence).await
    }

    /// Re-inserts a request under its original arrival sequence, restoring
    /// its FIFO position within the class after a dispatch-time shortage.
    pub async fn requeue(&self, request: BuildRequest, sequence: u64) -> bool {
        self.insert_at(request, sequence).await
    }

    async fn insert_at(&self, request: BuildRequest, sequence: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.entries.len() >= self.max_size {
            warn!(build_id = %request.id, "queue is full, cannot enqueue build");
            return false;
        }
        if inner.index.contains_key(&request.id) {
            warn!(build_id = %request.id, "build is already queued");
            return false;
        }

        let key = (request.priority.queue_value(), sequence);
        debug!(build_id = %request.id, priority = %request.priority, "enqueued build");
        inner.insert(key, request);
        drop(inner);

        self.not_empty.notify_one();
        true
    }

    /// Removes and returns the head item together with its arrival
    /// sequence. Blocks up to `timeout` for the queue to become non-empty;
    /// with no timeout it returns immediately.
    pub async fn dequeue_entry(
        &self,
        timeout: Option<Duration>,
    ) -> Option<(BuildRequest, u64)> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            // Register interest before checking, so a concurrent enqueue
            // between the check and the await cannot be missed.
            let notified = self.not_empty.notified();

            {
                let mut inner = self.inner.lock().await;
                let head_key = inner.entries.first_key_value().map(|(key, _)| *key);
                if let Some(key) = head_key {
                    if let Some(request) = inner.entries.remove(&key) {
                        let _previous = inner.index.remove(&request.id);
                        debug!(build_id = %request.id, "dequeued build");
                        return Some((request, key.1));
                    }
                }
            }

            let deadline = deadline?;
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Removes and returns the head request. See [`Self::dequeue_entry`]
    /// for the blocking contract.
    pub async fn dequeue(&self, timeout: Option<Duration>) -> Option<BuildRequest> {
        self.dequeue_entry(timeout).await.map(|(request, _)| request)
    }

    /// Non-destructive head read.
    pub async fn peek(&self) -> Option<BuildRequest> {
        let inner = self.inner.lock().await;
        inner.entries.iter().next().map(|(_, r)| r.clone())
    }

    /// Removes a specific item. Returns false for unknown ids.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.remove_by_id(id).is_some();
        if removed {
            debug!(build_id = %id, "removed build from queue");
        }
        removed
    }

    /// Moves an item to a new priority class with a refreshed arrival
    /// sequence: reprioritized items join the tail of their new class.
    pub async fn reprioritize(&self, id: Uuid, new_class: Priority) -> bool {
        let sequence = self.next_sequence();
        let mut inner = self.inner.lock().await;
        let Some((_, mut request)) = inner.remove_by_id(id) else {
            return false;
        };
        request.priority = new_class;
        inner.insert((new_class.queue_value(), sequence), request);
        debug!(build_id = %id, priority = %new_class, "reprioritized build");
        true
    }

    /// 1-based rank of an item under the full ordering.
    pub async fn position(&self, id: Uuid) -> Option<usize> {
        let inner = self.inner.lock().await;
        let key = *inner.index.get(&id)?;
        Some(inner.entries.range(..=key).count())
    }

    /// Number of queued items.
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Queued item count per priority class.
    pub async fn depth_by_class(&self) -> HashMap<Priority, usize> {
        let inner = self.inner.lock().await;
        let mut counts = HashMap::new();
        for request in inner.entries.values() {
            *counts.entry(request.priority).or_insert(0) += 1;
        }
        counts
    }

    /// Whether an id is currently queued.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.lock().await.index.contains_key(&id)
    }

    /// Seconds a queued item is expected to wait, assuming builds drain at
    /// `avg_build_seconds` apiece.
    pub async fn estimated_wait(&self, id: Uuid, avg_build_seconds: f64) -> Option<f64> {
        let position = self.position(id).await?;
        #[allow(clippy::cast_precision_loss)]
        let position = position as f64;
        Some(position * avg_build_seconds)
    }

    /// Empties the queue, returning how many items were dropped.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.index.clear();
        count
    }

    /// All queued requests in dispatch order.
    pub async fn snapshot(&self) -> Vec<BuildRequest> {
        let inner = self.inner.lock().await;
        inner.entries.values().cloned().collect()
    }
}
