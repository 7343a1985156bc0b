//! Resource client errors

use thiserror::Error;

/// Errors that can occur when listing or watching resources
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The requested resource version is too old; the caller must relist
    #[error("Resource version expired: {0}")]
    Expired(String),

    /// The API server returned an error status
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Message returned by the server
        message: String,
    },

    /// Field or label selector could not be parsed
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

impl ClientError {
    /// Returns `true` if the caller has to relist before watching again.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_) | Self::Api { code: 410, .. })
    }
}
