//! Deduplicating FIFO work queue.
//!
//! The queue tracks three sets of state:
//! - `queue`: items waiting to be handed out, in insertion order
//! - `dirty`: items that need processing (queued, or re-added while in flight)
//! - `processing`: items handed out by [`Queue::get`] and not yet [`Queue::done`]
//!
//! An item is never in `queue` twice and never handed to two consumers at once.
//! Re-adding an in-flight item only marks it dirty; [`Queue::done`] puts it back.

use crate::metrics::QueueMetrics;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A cloneable handle to a deduplicating work queue.
///
/// All operations are safe to call concurrently from multiple tasks.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Wakes tasks blocked in `get`
    available: Notify,
    /// Wakes tasks blocked in `shut_down_with_drain`
    drained: Notify,
    shutdown: CancellationToken,
    metrics: Option<QueueMetrics>,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashMap<T, Instant>,
    shutting_down: bool,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Queue")
            .field("len", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

impl<T> Default for Queue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates an empty queue without metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty queue that records into `metrics`.
    #[must_use]
    pub fn with_metrics(metrics: QueueMetrics) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<QueueMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashMap::new(),
                    shutting_down: false,
                }),
                available: Notify::new(),
                drained: Notify::new(),
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Marks `item` as needing processing.
    ///
    /// No-op if the item is already queued or the queue is shutting down.
    /// If the item is currently being processed it is queued again once
    /// [`Queue::done`] is called for it.
    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.add();
        }
        state.dirty.insert(item.clone());
        if state.processing.contains_key(&item) {
            return;
        }

        state.queue.push_back(item);
        self.record_depth(&state);
        drop(state);
        self.inner.available.notify_one();
    }

    /// Waits for the next item.
    ///
    /// Returns `None` once the queue is shutting down, including for calls that
    /// were already blocked when [`Queue::shut_down`] ran. Every `Some(item)`
    /// must be followed by exactly one [`Queue::done`] for that item.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Registered before the state check so a concurrent add or shutdown is not missed
            let notified = self.inner.available.notified();
            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone(), Instant::now());
                    self.record_depth(&state);
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Marks `item` as done processing.
    ///
    /// If the item was re-added while it was being processed, it is queued again.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        if let Some(started) = state.processing.remove(item) {
            if let Some(metrics) = &self.inner.metrics {
                metrics.observe_work(started.elapsed());
            }
        }

        let requeue = state.dirty.contains(item);
        if requeue {
            state.queue.push_back(item.clone());
            self.record_depth(&state);
        }
        let drained = state.processing.is_empty();
        drop(state);

        if requeue {
            self.inner.available.notify_one();
        }
        if drained {
            self.inner.drained.notify_waiters();
        }
    }

    /// Number of items waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns `true` if no items are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting new items and releases every task blocked in [`Queue::get`].
    ///
    /// Safe to call more than once.
    pub fn shut_down(&self) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        drop(state);

        tracing::debug!("Work queue shutting down");
        self.inner.shutdown.cancel();
        self.inner.available.notify_waiters();
    }

    /// Shuts the queue down and waits until every handed-out item has been marked done.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.state.lock().processing.is_empty() {
                return;
            }
            drained.await;
        }
    }

    /// Returns `true` once [`Queue::shut_down`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub(crate) fn shutdown_signal(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn metrics(&self) -> Option<&QueueMetrics> {
        self.inner.metrics.as_ref()
    }

    fn record_depth(&self, state: &State<T>) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_depth(state.queue.len());
        }
    }
}
