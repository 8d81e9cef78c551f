//! PoolClient trait for mocking
//!
//! This trait abstracts the pool client to enable mocking in unit tests.
//! The concrete PoolClient implements this trait, and tests use MockPoolClient.

use crate::error::PoolClientError;
use crds::NodeIPPool;

/// Read and conditional-write operations on `NodeIPPool` objects.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait PoolClientTrait: Send + Sync {
    /// Fetch the latest stored version of a pool, bypassing any cache.
    async fn get_pool(&self, name: &str) -> Result<NodeIPPool, PoolClientError>;

    /// Persist `pool`, conditioned on its `metadata.resourceVersion`.
    ///
    /// Returns the stored object (with its new resourceVersion) on success and
    /// [`PoolClientError::Conflict`] if another writer got there first.
    async fn update_pool(&self, pool: &NodeIPPool) -> Result<NodeIPPool, PoolClientError>;
}
