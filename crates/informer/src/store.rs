//! Thread-safe mirror storage

use crate::key::{KeyError, meta_namespace_key};
use kube::Resource;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared, read-only view of the mirrored objects.
///
/// Cloning is cheap; all clones see the same data. Only the informer writes.
pub struct Store<K> {
    items: Arc<RwLock<HashMap<String, Arc<K>>>>,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K> fmt::Debug for Store<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

/// Outcome of replacing the store contents with a fresh snapshot.
pub(crate) struct Replaced<K> {
    pub(crate) added: Vec<Arc<K>>,
    pub(crate) updated: Vec<(Arc<K>, Arc<K>)>,
    pub(crate) removed: Vec<(String, Arc<K>)>,
}

impl<K> Store<K> {
    /// Object stored under `key`.
    #[must_use]
    pub fn get_by_key(&self, key: &str) -> Option<Arc<K>> {
        self.items.read().get(key).cloned()
    }

    /// Mirrored copy of `object`, looked up by its key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingName`] if `object` has no name.
    pub fn get(&self, object: &K) -> Result<Option<Arc<K>>, KeyError>
    where
        K: Resource,
    {
        let key = meta_namespace_key(object)?;
        Ok(self.get_by_key(&key))
    }

    /// Every mirrored object, in no particular order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<K>> {
        self.items.read().values().cloned().collect()
    }

    /// Every key, sorted.
    #[must_use]
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.items.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of mirrored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` if nothing is mirrored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Stores `object` under `key`, returning the previous entry.
    pub(crate) fn insert(&self, key: String, object: Arc<K>) -> Option<Arc<K>> {
        self.items.write().insert(key, object)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<K>> {
        self.items.write().remove(key)
    }

    /// Swaps in `items` as the complete contents and reports what changed.
    ///
    /// Later duplicates of a key win.
    pub(crate) fn replace(&self, items: Vec<(String, Arc<K>)>) -> Replaced<K> {
        let mut fresh = HashMap::with_capacity(items.len());
        let mut order = Vec::with_capacity(items.len());
        for (key, object) in items {
            if fresh.insert(key.clone(), object).is_none() {
                order.push(key);
            }
        }

        let mut guard = self.items.write();
        let mut previous = std::mem::take(&mut *guard);
        let mut added = Vec::new();
        let mut updated = Vec::new();
        for key in &order {
            let Some(object) = fresh.get(key) else {
                continue;
            };
            match previous.remove(key) {
                Some(old) => updated.push((old, Arc::clone(object))),
                None => added.push(Arc::clone(object)),
            }
        }
        *guard = fresh;
        drop(guard);

        let mut removed: Vec<(String, Arc<K>)> = previous.into_iter().collect();
        removed.sort_by(|a, b| a.0.cmp(&b.0));
        Replaced {
            added,
            updated,
            removed,
        }
    }
}
