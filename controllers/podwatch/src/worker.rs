//! Queue workers and the event-counting consumer.

use crate::event::{Event, EventType};
use crate::queue::EventQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Result of processing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Done; clear the retry history
    Success,
    /// Try again after backoff
    Retry,
}

/// Consumer of queued events.
///
/// Implementations must be idempotent: the same key may be delivered again.
pub trait Reconcile: Send + Sync {
    /// Handle one event
    fn process(&self, event: &Event) -> ProcessOutcome;
}

/// Snapshot of [`EventCounter`] totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    /// Create events processed
    pub create: u64,
    /// Update events processed
    pub update: u64,
    /// Delete events processed
    pub delete: u64,
}

/// Counts processed events per type.
#[derive(Debug, Default)]
pub struct EventCounter {
    create: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
}

impl EventCounter {
    /// Current totals
    pub fn counts(&self) -> EventCounts {
        EventCounts {
            create: self.create.load(Ordering::Relaxed),
            update: self.update.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
        }
    }
}

impl Reconcile for EventCounter {
    fn process(&self, event: &Event) -> ProcessOutcome {
        let counter = match event.event_type {
            EventType::Create => &self.create,
            EventType::Update => &self.update,
            EventType::Delete => &self.delete,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!("Processed {}", event);
        ProcessOutcome::Success
    }
}

/// Pull events until the queue shuts down.
///
/// Each event is acknowledged with `done` exactly once, after either
/// `add_rate_limited` (retry) or `forget` (success).
pub async fn run_worker(id: usize, queue: EventQueue, reconciler: Arc<dyn Reconcile>) {
    info!("Worker {} started", id);
    while let Some(event) = queue.get().await {
        match reconciler.process(&event) {
            ProcessOutcome::Success => queue.forget(&event),
            ProcessOutcome::Retry => {
                warn!(
                    "Retrying {} (attempt {})",
                    event,
                    queue.num_requeues(&event) + 1
                );
                queue.add_rate_limited(event.clone());
            }
        }
        queue.done(&event);
    }
    info!("Worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use workqueue::ItemExponentialFailureRateLimiter;

    /// Fails the first `failures` attempts, then counts.
    struct FailFirst {
        failures: usize,
        attempts: AtomicUsize,
        counter: EventCounter,
    }

    impl Reconcile for FailFirst {
        fn process(&self, event: &Event) -> ProcessOutcome {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return ProcessOutcome::Retry;
            }
            self.counter.process(event)
        }
    }

    fn queue() -> EventQueue {
        EventQueue::new(ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
        ))
    }

    #[test]
    fn test_counter_counts_per_type() {
        let counter = EventCounter::default();
        counter.process(&Event::new("default/a", EventType::Create));
        counter.process(&Event::new("default/a", EventType::Update));
        counter.process(&Event::new("default/a", EventType::Update));
        assert_eq!(
            counter.counts(),
            EventCounts {
                create: 1,
                update: 2,
                delete: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_processes_until_shut_down() {
        let queue = queue();
        let counter = Arc::new(EventCounter::default());
        let worker = tokio::spawn(run_worker(1, queue.clone(), counter.clone()));

        queue.add(Event::new("default/a", EventType::Create));
        queue.add(Event::new("default/b", EventType::Delete));
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.shut_down();
        worker.await.unwrap();
        assert_eq!(
            counter.counts(),
            EventCounts {
                create: 1,
                update: 0,
                delete: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_retries_with_backoff_then_forgets() {
        let queue = queue();
        let reconciler = Arc::new(FailFirst {
            failures: 2,
            attempts: AtomicUsize::new(0),
            counter: EventCounter::default(),
        });
        let worker = tokio::spawn(run_worker(1, queue.clone(), reconciler.clone()));

        let event = Event::new("default/flaky", EventType::Update);
        queue.add(event.clone());

        // 100ms then 200ms of backoff before the third attempt
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(reconciler.counter.counts().update, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reconciler.counter.counts().update, 1);
        assert_eq!(queue.num_requeues(&event), 0);

        queue.shut_down();
        worker.await.unwrap();
    }

    /// Counts events while tracking how many run at once for the same key.
    #[derive(Default)]
    struct OverlapDetector {
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
        counter: EventCounter,
    }

    impl Reconcile for OverlapDetector {
        fn process(&self, event: &Event) -> ProcessOutcome {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.counter.process(event)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_workers_never_share_a_key() {
        let queue = queue();
        let reconciler = Arc::new(OverlapDetector::default());
        let workers: Vec<_> = (0..2)
            .map(|id| tokio::spawn(run_worker(id, queue.clone(), reconciler.clone())))
            .collect();

        let types = [EventType::Create, EventType::Update, EventType::Delete];
        for event_type in types.iter().cycle().take(30) {
            queue.add(Event::new("default/web", *event_type));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        queue.shut_down_with_drain().await;
        for worker in workers {
            worker.await.unwrap();
        }
        assert!(!reconciler.overlapped.load(Ordering::SeqCst));
        let counts = reconciler.counter.counts();
        assert!(counts.create + counts.update + counts.delete > 0);
    }
}
