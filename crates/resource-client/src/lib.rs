//! Resource Client
//!
//! List/watch access to one Kubernetes resource kind, behind a trait so the
//! local mirror can be driven by the real API server or by an in-memory mock.
//!
//! # Example
//!
//! ```no_run
//! use k8s_openapi::api::core::v1::Pod;
//! use resource_client::{KubeResourceClient, ListFilter, ResourceClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeResourceClient::<Pod>::try_default().await?;
//! let filter = ListFilter::namespaced("default").with_fields("status.phase=Running");
//! filter.validate()?;
//!
//! let pods = client.list(&filter).await?;
//! let events = client.watch(&filter, &pods.resource_version).await?;
//! # drop(events);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Server-side filtering**: namespace, field and label selectors
//! - **Resumable watches**: watches start after a resource version; a version
//!   that is too old surfaces as [`ClientError::Expired`]
//! - **Mocking**: `MockResourceClient` behind the `test-util` feature

pub mod client;
#[path = "trait.rs"]
pub mod client_trait;
pub mod error;
pub mod filter;
pub mod models;
pub mod selector;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeResourceClient;
pub use client_trait::{ResourceClient, WatchStream};
pub use error::ClientError;
pub use filter::{CompiledFilter, ListFilter};
pub use models::{ObjectList, WatchEvent};
pub use selector::{FieldSelector, LabelSelector};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockResourceClient;
