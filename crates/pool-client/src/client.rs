//! Kubernetes-backed pool client

use crate::error::PoolClientError;
use crate::pool_trait::PoolClientTrait;
use crds::NodeIPPool;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

/// Pool client talking to the cluster API server.
#[derive(Clone)]
pub struct PoolClient {
    api: Api<NodeIPPool>,
}

impl PoolClient {
    /// Creates a client for the cluster-scoped `NodeIPPool` resource.
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

impl std::fmt::Debug for PoolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolClient").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl PoolClientTrait for PoolClient {
    async fn get_pool(&self, name: &str) -> Result<NodeIPPool, PoolClientError> {
        debug!("GET NodeIPPool {}", name);
        self.api
            .get(name)
            .await
            .map_err(|e| PoolClientError::from_kube(name, e))
    }

    async fn update_pool(&self, pool: &NodeIPPool) -> Result<NodeIPPool, PoolClientError> {
        let name = pool.metadata.name.as_deref()
            .ok_or_else(|| PoolClientError::InvalidRequest("NodeIPPool missing name".to_string()))?;

        // Replace without a resourceVersion is an unconditional overwrite
        let version = pool.metadata.resource_version.as_deref()
            .ok_or_else(|| PoolClientError::InvalidRequest(format!(
                "NodeIPPool {} has no resourceVersion, refusing unconditional write", name
            )))?;

        debug!("PUT NodeIPPool {} (resourceVersion {}, {} entries)", name, version, pool.spec.pool.len());

        self.api
            .replace(name, &PostParams::default(), pool)
            .await
            .map_err(|e| PoolClientError::from_kube(name, e))
    }
}
