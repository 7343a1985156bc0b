//! Change detector: turns mirror notifications into queued events.

use crate::event::{Event, EventType};
use crate::queue::EventQueue;
use informer::{DeletedObject, ResourceEventHandler, deletion_handling_key, meta_namespace_key};
use kube::Resource;
use tracing::{error, info};

/// Pushes one [`Event`] per mirror notification onto the work queue.
///
/// Only the key and change type are queued; workers read current state from the mirror.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    queue: EventQueue,
}

impl ChangeDetector {
    /// Create a detector feeding `queue`
    pub fn new(queue: EventQueue) -> Self {
        Self { queue }
    }

    fn enqueue(&self, key: String, event_type: EventType) {
        self.queue.add(Event::new(key.clone(), event_type));
        info!("Event received of type [{}] for [{}]", event_type, key);
    }
}

impl<K> ResourceEventHandler<K> for ChangeDetector
where
    K: Resource + std::fmt::Debug,
{
    fn on_add(&self, obj: &K) {
        match meta_namespace_key(obj) {
            Ok(key) => self.enqueue(key, EventType::Create),
            Err(e) => error!("Failed to get key for added object ({:?}): {}", obj, e),
        }
    }

    fn on_update(&self, old: &K, _new: &K) {
        match meta_namespace_key(old) {
            Ok(key) => self.enqueue(key, EventType::Update),
            Err(e) => error!("Failed to get key for updated object ({:?}): {}", old, e),
        }
    }

    fn on_delete(&self, obj: &DeletedObject<K>) {
        match deletion_handling_key(obj) {
            Ok(key) => self.enqueue(key, EventType::Delete),
            Err(e) => error!(
                "Failed to get key for deleted object ({:?}): {}",
                obj.object(),
                e
            ),
        }
    }
}
