//! Mock ResourceClient for unit testing
//!
//! An in-memory API server for one resource kind. Every mutation bumps a
//! global resource version and is recorded, so watches can resume from any
//! earlier version exactly like they would against a real cluster.
//!
//! Selectors are applied client-side with API server watch semantics: an
//! update that makes an object stop matching is delivered as `Deleted`, one
//! that makes it start matching as `Added`.

use crate::client_trait::{ResourceClient, WatchStream};
use crate::error::ClientError;
use crate::filter::{CompiledFilter, ListFilter};
use crate::models::{ObjectList, WatchEvent};
use futures::{StreamExt, future, stream};
use kube::Resource;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// One recorded mutation.
#[derive(Clone)]
struct Change<K> {
    resource_version: u64,
    old: Option<K>,
    new: Option<K>,
}

struct MockState<K> {
    objects: BTreeMap<String, K>,
    resource_version: u64,
    history: Vec<Change<K>>,
    changes: broadcast::Sender<Change<K>>,
    failing_lists: usize,
    expiring_watches: usize,
    list_calls: usize,
    watch_calls: usize,
}

/// Mock ResourceClient for testing
#[derive(Clone)]
pub struct MockResourceClient<K> {
    state: Arc<Mutex<MockState<K>>>,
}

impl<K> fmt::Debug for MockResourceClient<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockResourceClient")
            .field("objects", &state.objects.len())
            .field("resource_version", &state.resource_version)
            .finish_non_exhaustive()
    }
}

impl<K> Default for MockResourceClient<K>
where
    K: Resource + Clone + Serialize + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MockResourceClient<K>
where
    K: Resource + Clone + Serialize + Send + Sync + 'static,
{
    /// Create an empty mock at resource version 1
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MockState {
                objects: BTreeMap::new(),
                resource_version: 1,
                history: Vec::new(),
                changes,
                failing_lists: 0,
                expiring_watches: 0,
                list_calls: 0,
                watch_calls: 0,
            })),
        }
    }

    /// Store a new object, returning it with its assigned resource version.
    ///
    /// # Errors
    ///
    /// Returns a 409 [`ClientError::Api`] if the object already exists.
    pub fn create(&self, mut object: K) -> Result<K, ClientError> {
        let key = object_key(&object)?;
        let mut state = self.state.lock();
        if state.objects.contains_key(&key) {
            return Err(ClientError::Api {
                code: 409,
                message: format!("{key} already exists"),
            });
        }
        let rv = state.next_resource_version();
        object.meta_mut().resource_version = Some(rv.to_string());
        state.objects.insert(key, object.clone());
        state.record(Change {
            resource_version: rv,
            old: None,
            new: Some(object.clone()),
        });
        Ok(object)
    }

    /// Replace an existing object, returning it with its new resource version.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ClientError::Api`] if the object does not exist.
    pub fn update(&self, mut object: K) -> Result<K, ClientError> {
        let key = object_key(&object)?;
        let mut state = self.state.lock();
        if !state.objects.contains_key(&key) {
            return Err(not_found(&key));
        }
        let rv = state.next_resource_version();
        object.meta_mut().resource_version = Some(rv.to_string());
        let old = state.objects.insert(key, object.clone());
        state.record(Change {
            resource_version: rv,
            old,
            new: Some(object.clone()),
        });
        Ok(object)
    }

    /// Delete the object stored under `key` (`namespace/name`), returning its final state.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ClientError::Api`] if the object does not exist.
    pub fn delete(&self, key: &str) -> Result<K, ClientError> {
        let mut state = self.state.lock();
        let Some(mut object) = state.objects.remove(key) else {
            return Err(not_found(key));
        };
        let rv = state.next_resource_version();
        object.meta_mut().resource_version = Some(rv.to_string());
        state.record(Change {
            resource_version: rv,
            old: Some(object.clone()),
            new: None,
        });
        Ok(object)
    }

    /// Current copy of the object stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<K> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Latest resource version handed out.
    #[must_use]
    pub fn resource_version(&self) -> u64 {
        self.state.lock().resource_version
    }

    /// End every open watch stream, as a dropped connection would.
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        state.changes = changes;
    }

    /// Make the next `count` list calls fail with a 500.
    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().failing_lists = count;
    }

    /// Make the next `count` watch calls fail with [`ClientError::Expired`].
    pub fn expire_next_watches(&self, count: usize) {
        self.state.lock().expiring_watches = count;
    }

    /// Number of list calls made so far, including failed ones.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Number of watch calls made so far, including failed ones.
    #[must_use]
    pub fn watch_calls(&self) -> usize {
        self.state.lock().watch_calls
    }
}

impl<K> MockState<K>
where
    K: Clone,
{
    fn next_resource_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }

    fn record(&mut self, change: Change<K>) {
        // No receivers is fine
        let _ = self.changes.send(change.clone());
        self.history.push(change);
    }
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for MockResourceClient<K>
where
    K: Resource + Clone + Serialize + Send + Sync + 'static,
{
    async fn list(&self, filter: &ListFilter) -> Result<ObjectList<K>, ClientError> {
        let compiled = filter.compile()?;
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(ClientError::Api {
                code: 500,
                message: "injected list failure".to_string(),
            });
        }

        Ok(ObjectList {
            resource_version: state.resource_version.to_string(),
            items: state
                .objects
                .values()
                .filter(|object| compiled.matches(*object))
                .cloned()
                .collect(),
        })
    }

    async fn watch(
        &self,
        filter: &ListFilter,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError> {
        let compiled = filter.compile()?;
        let mut state = self.state.lock();
        state.watch_calls += 1;
        if state.expiring_watches > 0 {
            state.expiring_watches -= 1;
            return Err(ClientError::Expired(format!(
                "too old resource version: {resource_version}"
            )));
        }

        let from = if resource_version.is_empty() {
            state.resource_version
        } else {
            resource_version.parse::<u64>().map_err(|_| ClientError::Api {
                code: 400,
                message: format!("invalid resource version {resource_version:?}"),
            })?
        };

        // History and subscription are taken under one lock so no change is missed or repeated
        let replay: Vec<Change<K>> = state
            .history
            .iter()
            .filter(|change| change.resource_version > from)
            .cloned()
            .collect();
        let receiver = state.changes.subscribe();
        drop(state);

        let live = stream::unfold(receiver, |mut receiver| async move {
            // Lagged or closed both end the watch; the caller resumes from its last version
            receiver.recv().await.ok().map(|change| (change, receiver))
        });

        Ok(stream::iter(replay)
            .chain(live)
            .filter_map(move |change| future::ready(translate(&compiled, change).map(Ok)))
            .boxed())
    }
}

fn translate<K>(filter: &CompiledFilter, change: Change<K>) -> Option<WatchEvent<K>>
where
    K: Resource + Serialize,
{
    let old_matches = change
        .old
        .as_ref()
        .is_some_and(|object| filter.matches(object));
    match change.new {
        Some(new) if filter.matches(&new) => Some(if old_matches {
            WatchEvent::Modified(new)
        } else {
            WatchEvent::Added(new)
        }),
        Some(new) => old_matches.then_some(WatchEvent::Deleted(new)),
        None => change.old.filter(|_| old_matches).map(WatchEvent::Deleted),
    }
}

fn object_key<K: Resource>(object: &K) -> Result<String, ClientError> {
    let meta = object.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ClientError::Api {
            code: 422,
            message: "metadata.name is required".to_string(),
        })?;
    Ok(match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    })
}

fn not_found(key: &str) -> ClientError {
    ClientError::Api {
        code: 404,
        message: format!("{key} not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ListFilter {
        ListFilter::namespaced("default").with_fields("status.phase=Running")
    }

    fn name_of(event: &WatchEvent<Pod>) -> Option<String> {
        match event {
            WatchEvent::Added(pod) | WatchEvent::Modified(pod) | WatchEvent::Deleted(pod) => {
                pod.metadata.name.clone()
            }
            WatchEvent::Bookmark(_) => None,
        }
    }

    #[tokio::test]
    async fn test_list_applies_filter_and_reports_version() {
        let mock = MockResourceClient::new();
        mock.create(pod("web", "Running")).unwrap();
        mock.create(pod("job", "Succeeded")).unwrap();

        let list = mock.list(&running()).await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].metadata.name.as_deref(), Some("web"));
        assert_eq!(list.resource_version, mock.resource_version().to_string());
        assert_eq!(mock.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_update_requires_existing() {
        let mock = MockResourceClient::new();
        mock.create(pod("web", "Running")).unwrap();
        assert!(matches!(
            mock.create(pod("web", "Running")),
            Err(ClientError::Api { code: 409, .. })
        ));
        assert!(matches!(
            mock.update(pod("other", "Running")),
            Err(ClientError::Api { code: 404, .. })
        ));
        assert!(matches!(
            mock.delete("default/other"),
            Err(ClientError::Api { code: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_watch_resumes_after_resource_version() {
        let mock = MockResourceClient::new();
        mock.create(pod("a", "Running")).unwrap();
        let rv = mock.resource_version().to_string();
        mock.create(pod("b", "Running")).unwrap();

        let mut watch = mock.watch(&running(), &rv).await.unwrap();
        let event = watch.next().await.unwrap().unwrap();
        assert!(matches!(event, WatchEvent::Added(_)));
        assert_eq!(name_of(&event).as_deref(), Some("b"));

        mock.delete("default/a").unwrap();
        let event = watch.next().await.unwrap().unwrap();
        assert!(matches!(event, WatchEvent::Deleted(_)));
        assert_eq!(name_of(&event).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_watch_translates_selector_transitions() {
        let mock = MockResourceClient::new();
        let rv = mock.resource_version().to_string();
        let mut watch = mock.watch(&running(), &rv).await.unwrap();

        mock.create(pod("web", "Pending")).unwrap();
        mock.update(pod("web", "Running")).unwrap();
        mock.update(pod("web", "Running")).unwrap();
        mock.update(pod("web", "Failed")).unwrap();

        assert!(matches!(watch.next().await, Some(Ok(WatchEvent::Added(_)))));
        assert!(matches!(watch.next().await, Some(Ok(WatchEvent::Modified(_)))));
        match watch.next().await {
            Some(Ok(WatchEvent::Deleted(pod))) => {
                let phase = pod.status.and_then(|status| status.phase);
                assert_eq!(phase.as_deref(), Some("Failed"));
            }
            other => panic!("expected Deleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_ends_open_watches() {
        let mock = MockResourceClient::<Pod>::new();
        let rv = mock.resource_version().to_string();
        let mut watch = mock.watch(&running(), &rv).await.unwrap();

        mock.disconnect_watchers();
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_are_one_shot() {
        let mock = MockResourceClient::<Pod>::new();
        mock.fail_next_lists(1);
        mock.expire_next_watches(1);

        assert!(mock.list(&running()).await.is_err());
        assert!(mock.list(&running()).await.is_ok());
        assert_eq!(mock.list_calls(), 2);

        let expired = mock.watch(&running(), "1").await.err().unwrap();
        assert!(expired.is_expired());
        assert!(mock.watch(&running(), "1").await.is_ok());
        assert_eq!(mock.watch_calls(), 2);
    }
}
