//! Change notifications from the local mirror

use std::sync::Arc;

/// Last known state of an object that disappeared while the watch was down.
///
/// The deletion itself was never observed, so `obj` may be stale.
#[derive(Debug, Clone)]
pub struct DeletedFinalStateUnknown<K> {
    /// Mirror key the object was stored under
    pub key: String,
    /// Last copy held by the mirror
    pub obj: Arc<K>,
}

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// Final state reported by the watch
    Live(Arc<K>),
    /// Deletion inferred from a relist
    Tombstone(DeletedFinalStateUnknown<K>),
}

impl<K> DeletedObject<K> {
    /// The deleted object, possibly stale for tombstones.
    #[must_use]
    pub fn object(&self) -> &K {
        match self {
            Self::Live(obj) => obj,
            Self::Tombstone(tombstone) => &tombstone.obj,
        }
    }

    /// Returns `true` if the deletion was inferred rather than observed.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone(_))
    }
}

/// Observer of mirror changes.
///
/// Called synchronously on the informer task, after the mirror has been
/// updated. Implementations must not block.
pub trait ResourceEventHandler<K>: Send + Sync {
    /// An object entered the mirror
    fn on_add(&self, obj: &K);

    /// An object in the mirror was replaced, or replayed by a resync (`old` and `new` equal)
    fn on_update(&self, old: &K, new: &K);

    /// An object left the mirror
    fn on_delete(&self, obj: &DeletedObject<K>);
}

impl<K, H> ResourceEventHandler<K> for Arc<H>
where
    H: ResourceEventHandler<K> + ?Sized,
{
    fn on_add(&self, obj: &K) {
        (**self).on_add(obj);
    }

    fn on_update(&self, old: &K, new: &K) {
        (**self).on_update(old, new);
    }

    fn on_delete(&self, obj: &DeletedObject<K>) {
        (**self).on_delete(obj);
    }
}
