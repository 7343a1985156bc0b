//! Event queue keyed by object.
//!
//! The work queue token is the object key, so one object is never pending twice
//! and never handed to two workers at once. The change type travels beside it:
//! re-adding a key that is already pending replaces its type with the latest one.

use crate::event::{Event, EventType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use workqueue::{QueueMetrics, RateLimiter, RateLimitingQueue, default_controller_rate_limiter};

/// Rate-limited queue of [`Event`]s, deduplicated by key.
#[derive(Debug, Clone)]
pub struct EventQueue {
    keys: RateLimitingQueue<String>,
    pending: Arc<Mutex<HashMap<String, EventType>>>,
}

impl EventQueue {
    /// Creates a queue retrying with `limiter`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(limiter: impl RateLimiter<String> + 'static) -> Self {
        Self::from_keys(RateLimitingQueue::new(limiter))
    }

    /// Creates a queue with the default controller rate limiter, recording into `metrics`.
    pub fn with_metrics(metrics: QueueMetrics) -> Self {
        Self::from_keys(RateLimitingQueue::with_metrics(
            default_controller_rate_limiter(),
            metrics,
        ))
    }

    fn from_keys(keys: RateLimitingQueue<String>) -> Self {
        Self {
            keys,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queues `event`, replacing the type of a pending event for the same key.
    pub fn add(&self, event: Event) {
        if self.keys.is_shutting_down() {
            return;
        }
        self.pending.lock().insert(event.key.clone(), event.event_type);
        self.keys.add(event.key);
    }

    /// Re-queues a failed event after backoff, unless a newer change is already pending.
    pub fn add_rate_limited(&self, event: Event) {
        if self.keys.is_shutting_down() {
            return;
        }
        self.pending
            .lock()
            .entry(event.key.clone())
            .or_insert(event.event_type);
        self.keys.add_rate_limited(event.key);
    }

    /// Waits for the next event; `None` once the queue is shutting down.
    pub async fn get(&self) -> Option<Event> {
        loop {
            let key = self.keys.get().await?;
            let event_type = self.pending.lock().remove(&key);
            match event_type {
                Some(event_type) => return Some(Event::new(key, event_type)),
                None => {
                    // Latest change for this key was taken by an earlier delivery
                    debug!("Nothing pending for {}", key);
                    self.keys.done(&key);
                }
            }
        }
    }

    /// Marks the event's key as processed. Call exactly once per [`EventQueue::get`].
    pub fn done(&self, event: &Event) {
        self.keys.done(&event.key);
    }

    /// Clears the retry history of the event's key.
    pub fn forget(&self, event: &Event) {
        self.keys.forget(&event.key);
    }

    /// Number of retries recorded for the event's key.
    #[must_use]
    pub fn num_requeues(&self, event: &Event) -> u32 {
        self.keys.num_requeues(&event.key)
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns `true` once the queue is shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.keys.is_shutting_down()
    }

    /// Stops handing out events.
    pub fn shut_down(&self) {
        self.keys.shut_down();
    }

    /// Stops handing out events and waits for in-flight ones to be done.
    pub async fn shut_down_with_drain(&self) {
        self.keys.shut_down_with_drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue() -> EventQueue {
        EventQueue::new(default_controller_rate_limiter())
    }

    async fn try_get(queue: &EventQueue) -> Option<Event> {
        tokio::time::timeout(Duration::from_millis(10), queue.get())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_mixed_types_for_one_key_share_one_slot() {
        let queue = queue();
        queue.add(Event::new("default/web", EventType::Create));
        queue.add(Event::new("default/web", EventType::Update));
        queue.add(Event::new("default/web", EventType::Delete));
        assert_eq!(queue.len(), 1);

        let event = try_get(&queue).await.unwrap();
        assert_eq!(event, Event::new("default/web", EventType::Delete));
        assert_eq!(try_get(&queue).await, None);

        queue.done(&event);
        assert_eq!(try_get(&queue).await, None);
    }

    #[tokio::test]
    async fn test_change_while_in_flight_is_delivered_after_done() {
        let queue = queue();
        queue.add(Event::new("default/web", EventType::Create));
        let first = try_get(&queue).await.unwrap();

        queue.add(Event::new("default/web", EventType::Update));
        assert_eq!(try_get(&queue).await, None);

        queue.done(&first);
        assert_eq!(
            try_get(&queue).await,
            Some(Event::new("default/web", EventType::Update))
        );
    }

    #[tokio::test]
    async fn test_retry_does_not_override_newer_change() {
        let queue = queue();
        queue.add(Event::new("default/web", EventType::Update));
        let failed = try_get(&queue).await.unwrap();

        queue.add(Event::new("default/web", EventType::Delete));
        queue.add_rate_limited(failed.clone());
        queue.done(&failed);

        assert_eq!(
            try_get(&queue).await,
            Some(Event::new("default/web", EventType::Delete))
        );
    }

    #[tokio::test]
    async fn test_shut_down_releases_getters() {
        let queue = queue();
        queue.add(Event::new("default/web", EventType::Create));
        queue.shut_down();
        assert_eq!(queue.get().await, None);

        queue.add(Event::new("default/api", EventType::Create));
        assert_eq!(queue.len(), 1);
    }
}
