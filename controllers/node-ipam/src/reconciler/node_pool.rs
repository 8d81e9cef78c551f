//! NodeIPPool reconciler

use super::expand::{Expansion, expand_pool};
use super::recycle::{Recycled, recycle_pool};
use super::{Mutation, Outcome, Reconciler};
use crate::error::ControllerError;
use crds::NodeIPPool;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolUpdate {
    expansion: Expansion,
    recycled: Recycled,
}

impl Reconciler {
    /// Recycles orphaned reservations and expands the pool for one node.
    pub async fn reconcile_node_pool(&self, key: &str) -> Result<Outcome, ControllerError> {
        let Some(pool) = self.pools.get(key)? else {
            debug!("NodeIPPool {} no longer exists", key);
            self.recycle_tracker().forget_pool(key);
            return Ok(Outcome::Done);
        };

        debug!("Reconciling NodeIPPool {}", key);

        let update = self
            .write_back(&pool, |copy| self.compute_pool_update(copy))
            .await?;

        if !update.recycled.freed.is_empty() {
            info!(
                "Recycled {} address(es) in NodeIPPool {}: {}",
                update.recycled.freed.len(),
                key,
                update.recycled.freed.join(", ")
            );
        }
        if !update.expansion.added.is_empty() {
            info!(
                "Expanded NodeIPPool {} by {} address(es) ({} .. {})",
                key,
                update.expansion.added.len(),
                update.expansion.added[0],
                update.expansion.added[update.expansion.added.len() - 1]
            );
        }
        if update.expansion.exhausted {
            warn!("NodeIPPool {}: pod CIDR exhausted, cannot expand further", key);
        }

        Ok(match update.recycled.retry_in {
            Some(delay) => Outcome::RequeueAfter(delay),
            None => Outcome::Done,
        })
    }

    fn compute_pool_update(&self, pool: &mut NodeIPPool) -> Result<Mutation<PoolUpdate>, ControllerError> {
        let name = pool.metadata.name.clone().unwrap_or_default();

        let recycled = {
            let mut tracker = self.recycle_tracker();
            let recycled = recycle_pool(pool, self.owners.as_ref(), &mut tracker, Instant::now())?;
            if recycled.retry_in.is_some() {
                debug!("NodeIPPool {}: {} reservation(s) inside grace window", name, tracker.pending(&name));
            }
            recycled
        };

        let expansion = match expand_pool(pool, self.config.low_watermark, self.config.expand_step) {
            Ok(expansion) => expansion,
            Err(ControllerError::MalformedData(msg)) => {
                warn!("Not expanding NodeIPPool {}: {}", name, msg);
                Expansion::default()
            }
            Err(e) => return Err(e),
        };

        let changed = !recycled.freed.is_empty() || !expansion.added.is_empty();
        let update = PoolUpdate { expansion, recycled };
        Ok(if changed {
            Mutation::Changed(update)
        } else {
            Mutation::Unchanged(update)
        })
    }
}
