//! ResourceClient trait for mocking
//!
//! This trait abstracts list/watch access to the API server so the informer
//! can be driven by an in-memory client in unit tests.

use crate::error::ClientError;
use crate::filter::ListFilter;
use crate::models::{ObjectList, WatchEvent};
use futures::stream::BoxStream;

/// Stream of watch events. Ends when the server closes the watch.
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>, ClientError>>;

/// Trait for list/watch operations on one resource kind
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Send + 'static,
{
    /// List every object matching `filter`.
    async fn list(&self, filter: &ListFilter) -> Result<ObjectList<K>, ClientError>;

    /// Watch changes to objects matching `filter` that happened after `resource_version`.
    ///
    /// Fails with [`ClientError::Expired`] when `resource_version` is too old
    /// to resume from; the caller must list again.
    async fn watch(
        &self,
        filter: &ListFilter,
        resource_version: &str,
    ) -> Result<WatchStream<K>, ClientError>;
}
