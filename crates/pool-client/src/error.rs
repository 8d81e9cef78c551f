//! Pool client errors

use thiserror::Error;

/// Errors that can occur when reading or writing `NodeIPPool` objects
#[derive(Debug, Error)]
pub enum PoolClientError {
    /// The stored object changed since it was read (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The object does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request can never succeed as built (e.g. missing resourceVersion)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other API or connectivity failure
    #[error("Kubernetes API error: {0}")]
    Transient(#[source] kube::Error),
}

impl PoolClientError {
    /// Classifies a kube error raised while operating on pool `name`.
    pub fn from_kube(name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 409 => {
                PoolClientError::Conflict(format!("NodeIPPool {} was modified concurrently: {}", name, response.message))
            }
            kube::Error::Api(response) if response.code == 404 => {
                PoolClientError::NotFound(format!("NodeIPPool {}: {}", name, response.message))
            }
            other => PoolClientError::Transient(other),
        }
    }

    /// Returns true if re-reading and retrying can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolClientError::InvalidRequest(_))
    }
}
