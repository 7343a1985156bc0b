//! Informer errors

use resource_client::ClientError;
use thiserror::Error;

/// Errors returned when starting an informer
#[derive(Debug, Error)]
pub enum InformerError {
    /// `run` was called more than once
    #[error("Informer already started")]
    AlreadyStarted,

    /// The configured filter cannot be sent to the API server
    #[error("Invalid list filter: {0}")]
    InvalidFilter(#[from] ClientError),
}
