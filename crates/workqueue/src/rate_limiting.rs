//! Work queue with delayed and rate-limited re-adds.

use crate::delaying::{Waiting, spawn_waiting_loop};
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::rate_limiter::RateLimiter;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A [`Queue`] that can hold items back for a delay and retry failing items with backoff.
///
/// Consumer contract: call [`RateLimitingQueue::get`], process the item, then
/// either [`RateLimitingQueue::add_rate_limited`] (retry) or
/// [`RateLimitingQueue::forget`] (success), and finally
/// [`RateLimitingQueue::done`] exactly once.
pub struct RateLimitingQueue<T> {
    queue: Queue<T>,
    waiting: mpsc::UnboundedSender<Waiting<T>>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            waiting: self.waiting.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<T> fmt::Debug for RateLimitingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitingQueue")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a queue using `limiter` for retries.
    ///
    /// Spawns the delayed-add task, so it must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(limiter: impl RateLimiter<T> + 'static) -> Self {
        Self::from_queue(Queue::new(), limiter)
    }

    /// Like [`RateLimitingQueue::new`], recording into `metrics`.
    #[must_use]
    pub fn with_metrics(limiter: impl RateLimiter<T> + 'static, metrics: QueueMetrics) -> Self {
        Self::from_queue(Queue::with_metrics(metrics), limiter)
    }

    fn from_queue(queue: Queue<T>, limiter: impl RateLimiter<T> + 'static) -> Self {
        let waiting = spawn_waiting_loop(queue.clone());
        Self {
            queue,
            waiting,
            limiter: Arc::new(limiter),
        }
    }

    /// See [`Queue::add`].
    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    /// Adds `item` once `delay` has elapsed. A zero delay adds immediately.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }

        let entry = Waiting {
            ready_at: Instant::now() + delay,
            item,
        };
        if self.waiting.send(entry).is_err() {
            tracing::debug!("Delayed add dropped, waiting loop has stopped");
        }
    }

    /// Re-adds a failed item after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, item: T) {
        if let Some(metrics) = self.queue.metrics() {
            metrics.retry();
        }
        let delay = self.limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Clears the retry history of `item` so its next failure starts from the base delay.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    /// Number of rate-limited retries recorded for `item`.
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`Queue::get`].
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// See [`Queue::done`].
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// See [`Queue::len`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`Queue::is_empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`Queue::shut_down`]. Also stops the delayed-add task.
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// See [`Queue::shut_down_with_drain`].
    pub async fn shut_down_with_drain(&self) {
        self.queue.shut_down_with_drain().await;
    }

    /// See [`Queue::is_shutting_down`].
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }
}
