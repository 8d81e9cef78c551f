//! NodeIPPool write-back client
//!
//! Reads and conditionally replaces `NodeIPPool` objects. Every write carries
//! the `resourceVersion` observed when the copy was read, so a concurrent
//! writer makes the request fail with [`PoolClientError::Conflict`] instead
//! of being overwritten.
//!
//! # Example
//!
//! ```no_run
//! use pool_client::{PoolClient, PoolClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = PoolClient::new(kube::Client::try_default().await?);
//!
//! let mut pool = client.get_pool("node-a").await?;
//! pool.spec.pool.insert("10.244.1.0".to_string(), Default::default());
//! let stored = client.update_pool(&pool).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod pool_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::PoolClient;
pub use error::PoolClientError;
pub use pool_trait::PoolClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPoolClient;
