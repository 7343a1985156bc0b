//! Controller-specific error types.
//!
//! This module defines error types specific to the pod watcher that are not
//! covered by upstream library errors.

use informer::InformerError;
use kube::Error as KubeError;
use resource_client::ClientError;
use thiserror::Error;

/// Errors that can occur in the pod watcher.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// List/watch client error
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The local mirror could not be started
    #[error("Informer error: {0}")]
    Informer(#[from] InformerError),

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Probe server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
