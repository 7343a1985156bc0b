//! Delayed adds.
//!
//! A single background task per queue holds items that must not be added before
//! a given instant. Each item is held at most once, at its earliest ready time.

use crate::queue::Queue;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

/// An item waiting to be added to the queue.
#[derive(Debug)]
pub(crate) struct Waiting<T> {
    pub(crate) ready_at: Instant,
    pub(crate) item: T,
}

/// Spawns the waiting loop for `queue` and returns the channel feeding it.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_waiting_loop<T>(queue: Queue<T>) -> mpsc::UnboundedSender<Waiting<T>>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(waiting_loop(queue, rx));
    tx
}

async fn waiting_loop<T>(queue: Queue<T>, mut rx: mpsc::UnboundedReceiver<Waiting<T>>)
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    let shutdown = queue.shutdown_signal();
    let mut waiting = WaitingSet::default();

    loop {
        for item in waiting.pop_ready(Instant::now()) {
            queue.add(item);
        }

        let next_ready = waiting.next_ready_at();
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = sleep_until_ready(next_ready) => {}
            entry = rx.recv() => match entry {
                Some(entry) => waiting.insert(entry.ready_at, entry.item),
                // Every queue handle is gone
                None => return,
            },
        }
    }
}

async fn sleep_until_ready(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Time-ordered set of waiting items, deduplicated by item.
pub(crate) struct WaitingSet<T> {
    by_time: BTreeMap<(Instant, u64), T>,
    by_item: HashMap<T, (Instant, u64)>,
    sequence: u64,
}

impl<T> Default for WaitingSet<T> {
    fn default() -> Self {
        Self {
            by_time: BTreeMap::new(),
            by_item: HashMap::new(),
            sequence: 0,
        }
    }
}

impl<T> WaitingSet<T>
where
    T: Clone + Eq + Hash,
{
    /// Holds `item` until `ready_at`, unless it is already held until an earlier instant.
    pub(crate) fn insert(&mut self, ready_at: Instant, item: T) {
        if let Some(existing) = self.by_item.get(&item) {
            if existing.0 <= ready_at {
                return;
            }
            self.by_time.remove(existing);
        }

        self.sequence += 1;
        let slot = (ready_at, self.sequence);
        self.by_item.insert(item.clone(), slot);
        self.by_time.insert(slot, item);
    }

    /// Removes and returns every item whose ready time is at or before `now`.
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(entry) = self.by_time.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let item = entry.remove();
            self.by_item.remove(&item);
            ready.push(item);
        }
        ready
    }

    pub(crate) fn next_ready_at(&self) -> Option<Instant> {
        self.by_time.keys().next().map(|(ready_at, _)| *ready_at)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_time.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_waiting_set_keeps_earliest_ready_time() {
        let now = Instant::now();
        let mut waiting = WaitingSet::default();
        waiting.insert(now + Duration::from_secs(10), "a");
        waiting.insert(now + Duration::from_secs(5), "a");
        waiting.insert(now + Duration::from_secs(20), "a");

        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting.next_ready_at(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_waiting_set_pops_in_time_order() {
        let now = Instant::now();
        let mut waiting = WaitingSet::default();
        waiting.insert(now + Duration::from_secs(3), "c");
        waiting.insert(now + Duration::from_secs(1), "a");
        waiting.insert(now + Duration::from_secs(2), "b");

        assert!(waiting.pop_ready(now).is_empty());
        assert_eq!(waiting.pop_ready(now + Duration::from_secs(2)), vec!["a", "b"]);
        assert_eq!(waiting.pop_ready(now + Duration::from_secs(60)), vec!["c"]);
        assert_eq!(waiting.next_ready_at(), None);
    }
}
