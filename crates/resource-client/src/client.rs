//! Kubernetes-backed resource client

use crate::client_trait::{ResourceClient, WatchStream};
use crate::error::ClientError;
use crate::filter::ListFilter;
use crate::models::{ObjectList, WatchEvent};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, WatchParams};
use kube::core::WatchEvent as KubeWatchEvent;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use tracing::debug;

/// Server-side watch timeout. Kept below the API server's 5 minute cap so
/// watches end cleanly and are re-established from the last resource version.
pub const WATCH_TIMEOUT_SECS: u32 = 290;

/// Lists and watches `K` through the Kubernetes API.
///
/// Selectors are evaluated by the API server.
pub struct KubeResourceClient<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeResourceClient<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> Debug for KubeResourceClient<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeResourceClient")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    /// Create a client from an existing Kubernetes client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    /// Create a client from the in-cluster or kubeconfig environment
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Kube`] if no usable configuration is found.
    pub async fn try_default() -> Result<Self, ClientError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, filter: &ListFilter) -> Api<K> {
        match &filter.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, filter: &ListFilter) -> Result<ObjectList<K>, ClientError> {
        let mut params = ListParams::default();
        if let Some(fields) = filter.fields() {
            params = params.fields(fields);
        }
        if let Some(labels) = filter.labels() {
            params = params.labels(labels);
        }

        let list = self.api(filter).list(&params).await.map_err(map_kube_error)?;
        let resource_version = list.metadata.resource_version.unwrap_or_default();
        debug!(
            "Listed {} objects at resource version {}",
            list.items.len(),
            resource_version
        );
        Ok(ObjectList {
            resource_version,
            items: list.items,
        })
    }

    async fn watch(
        &self,
        filter: &ListFilter,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError> {
        let mut params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        if let Some(fields) = filter.fields() {
            params = params.fields(fields);
        }
        if let Some(labels) = filter.labels() {
            params = params.labels(labels);
        }

        let stream = self
            .api(filter)
            .watch(&params, resource_version)
            .await
            .map_err(map_kube_error)?;

        Ok(stream
            .map(|event| match event {
                Ok(KubeWatchEvent::Added(obj)) => Ok(WatchEvent::Added(obj)),
                Ok(KubeWatchEvent::Modified(obj)) => Ok(WatchEvent::Modified(obj)),
                Ok(KubeWatchEvent::Deleted(obj)) => Ok(WatchEvent::Deleted(obj)),
                Ok(KubeWatchEvent::Bookmark(bookmark)) => {
                    Ok(WatchEvent::Bookmark(bookmark.metadata.resource_version))
                }
                Ok(KubeWatchEvent::Error(status)) if status.code == 410 => {
                    Err(ClientError::Expired(status.message.to_string()))
                }
                Ok(KubeWatchEvent::Error(status)) => Err(ClientError::Api {
                    code: status.code,
                    message: status.message.to_string(),
                }),
                Err(e) => Err(map_kube_error(e)),
            })
            .boxed())
    }
}

/// Maps "410 Gone" to [`ClientError::Expired`] so callers know to relist.
fn map_kube_error(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(status) if status.code == 410 => {
            ClientError::Expired(status.message.to_string())
        }
        other => ClientError::Kube(other),
    }
}
