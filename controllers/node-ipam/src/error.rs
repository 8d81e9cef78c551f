//! Controller-specific error types.
//!
//! This module defines the error taxonomy of the node IPAM controller and
//! how each class is handled by the worker loops: retried with backoff, or
//! dropped after logging.

use thiserror::Error;
use kube::Error as KubeError;
use pool_client::PoolClientError;
use crate::cache::CacheError;

/// Errors that can occur in the Node IPAM Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Pool read/write error
    #[error("Pool client error: {0}")]
    PoolClient(#[from] PoolClientError),

    /// Local cache not usable yet
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Concurrent writer won the race, even after re-reading
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Node has no NodeIPPool (yet)
    #[error("NodeIPPool not found: {0}")]
    PoolNotFound(String),

    /// No free address left in the pool
    #[error("No available IPs in pool: {0}")]
    Exhausted(String),

    /// Stored data cannot be interpreted; retrying will not help
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Returns true if the key should be re-queued with backoff.
    ///
    /// Malformed data and configuration errors are dropped instead: the same
    /// input would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::PoolClient(e) => e.is_retryable(),
            ControllerError::MalformedData(_) | ControllerError::InvalidConfig(_) => false,
            ControllerError::Kube(_)
            | ControllerError::Cache(_)
            | ControllerError::Conflict(_)
            | ControllerError::PoolNotFound(_)
            | ControllerError::Exhausted(_)
            | ControllerError::Watch(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ControllerError::Conflict("node-a".to_string()).is_retryable());
        assert!(ControllerError::Exhausted("node-a".to_string()).is_retryable());
        assert!(ControllerError::PoolNotFound("node-a".to_string()).is_retryable());
        assert!(ControllerError::Cache(CacheError::NotSynced("Pod")).is_retryable());
        assert!(!ControllerError::MalformedData("bad owner".to_string()).is_retryable());
        assert!(!ControllerError::PoolClient(PoolClientError::InvalidRequest("x".to_string())).is_retryable());
        assert!(ControllerError::PoolClient(PoolClientError::Conflict("x".to_string())).is_retryable());
    }
}
