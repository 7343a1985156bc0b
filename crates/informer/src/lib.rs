//! Informer
//!
//! A local, eventually consistent mirror of one Kubernetes resource kind,
//! kept current by list/watch, with change notifications for every update
//! applied to the mirror.
//!
//! # Guarantees
//!
//! - **Mirror first**: handlers run after the mirror reflects the change.
//! - **Last write wins** per key; keys are `namespace/name` (or `name`).
//! - **Missed deletions surface**: objects that vanish between a lost watch and
//!   the following relist are reported as [`DeletedObject::Tombstone`].
//! - **Resumable**: dropped watches resume from the last resource version;
//!   only an expired version forces a relist.
//!
//! # Example
//!
//! ```no_run
//! use informer::{DeletedObject, Informer, InformerConfig, ResourceEventHandler};
//! use k8s_openapi::api::core::v1::Pod;
//! use resource_client::{KubeResourceClient, ListFilter};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! impl ResourceEventHandler<Pod> for Printer {
//!     fn on_add(&self, pod: &Pod) {
//!         println!("added {:?}", pod.metadata.name);
//!     }
//!     fn on_update(&self, _old: &Pod, new: &Pod) {
//!         println!("updated {:?}", new.metadata.name);
//!     }
//!     fn on_delete(&self, pod: &DeletedObject<Pod>) {
//!         println!("deleted {:?}", pod.object().metadata.name);
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeResourceClient::<Pod>::try_default().await?;
//! let config = InformerConfig::new(ListFilter::namespaced("default"));
//! let informer = Arc::new(Informer::new(client, config, Printer));
//!
//! let token = CancellationToken::new();
//! let running = tokio::spawn({
//!     let informer = Arc::clone(&informer);
//!     let token = token.clone();
//!     async move { informer.run(token).await }
//! });
//!
//! if informer.wait_for_initial_sync(&token).await {
//!     println!("{} pods mirrored", informer.store().len());
//! }
//! token.cancel();
//! running.await??;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handler;
pub mod informer;
pub mod key;
pub mod store;

pub use error::InformerError;
pub use handler::{DeletedFinalStateUnknown, DeletedObject, ResourceEventHandler};
pub use informer::{Informer, InformerConfig, ResyncPolicy};
pub use key::{KeyError, deletion_handling_key, meta_namespace_key, split_key};
pub use store::Store;
