//! Recycling of addresses whose owner workload is gone.

use crate::cache::{OwnerLookup, OwnerState};
use crate::error::ControllerError;
use crds::{AllocationRecord, NodeIPPool, OwnerIdentity};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// (pool name, pool key, owner identity)
type Reservation = (String, String, String);

/// Remembers when reservations were first seen with a missing owner, so
/// their addresses are only freed once the grace window has passed.
#[derive(Debug, Default)]
pub struct RecycleTracker {
    grace: Duration,
    missing_since: HashMap<Reservation, Instant>,
}

impl RecycleTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            missing_since: HashMap::new(),
        }
    }

    /// Returns `None` if the address may be freed now, or the time left in
    /// the grace window.
    fn remaining(&mut self, reservation: &Reservation, now: Instant) -> Option<Duration> {
        if self.grace.is_zero() {
            return None;
        }
        let since = *self.missing_since.entry(reservation.clone()).or_insert(now);
        let elapsed = now.saturating_duration_since(since);
        (elapsed < self.grace).then(|| self.grace - elapsed)
    }

    /// Keeps only the entries of `pool` that are still waiting out their
    /// grace window.
    fn retain_waiting(&mut self, pool: &str, waiting: &HashSet<Reservation>) {
        self.missing_since
            .retain(|reservation, _| reservation.0 != pool || waiting.contains(reservation));
    }

    /// Drops everything remembered for a deleted pool.
    pub fn forget_pool(&mut self, pool: &str) {
        self.missing_since.retain(|reservation, _| reservation.0 != pool);
    }

    /// Reservations of `pool` currently inside their grace window
    pub fn pending(&self, pool: &str) -> usize {
        self.missing_since.keys().filter(|reservation| reservation.0 == pool).count()
    }
}

/// Result of one recycling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recycled {
    /// Pool keys whose reservation was cleared
    pub freed: Vec<String>,
    /// Shortest remaining grace window among owners not freed yet
    pub retry_in: Option<Duration>,
}

/// Clears reservations whose owner no longer exists.
///
/// Malformed owner strings and kinds that cannot be looked up are skipped with
/// a warning. A failed lookup fails the whole pass; the caller must not
/// write the partially recycled copy.
pub fn recycle_pool(
    pool: &mut NodeIPPool,
    owners: &dyn OwnerLookup,
    tracker: &mut RecycleTracker,
    now: Instant,
) -> Result<Recycled, ControllerError> {
    let pool_name = pool.metadata.name.clone().unwrap_or_default();
    let mut recycled = Recycled::default();
    let mut waiting = HashSet::new();

    for (address, record) in pool.spec.pool.iter_mut() {
        if record.is_free() {
            continue;
        }

        let owner: OwnerIdentity = match record.owner.parse() {
            Ok(owner) => owner,
            Err(e) => {
                warn!("Skipping {} in NodeIPPool {}: {}", address, pool_name, e);
                continue;
            }
        };

        match owners.lookup(&owner)? {
            OwnerState::Present => {}
            OwnerState::Unsupported => {
                warn!(
                    "Skipping {} in NodeIPPool {}: unsupported owner kind {}",
                    address, pool_name, owner.kind
                );
            }
            OwnerState::Missing => {
                let reservation = (pool_name.clone(), address.clone(), record.owner.clone());
                if let Some(remaining) = tracker.remaining(&reservation, now) {
                    debug!("Owner {} of {} missing, recycling in {:?}", owner, address, remaining);
                    recycled.retry_in = Some(recycled.retry_in.map_or(remaining, |r| r.min(remaining)));
                    waiting.insert(reservation);
                    continue;
                }
                *record = AllocationRecord::default();
                recycled.freed.push(address.clone());
            }
        }
    }

    // Drop entries that stopped waiting
    tracker.retain_waiting(&pool_name, &waiting);

    Ok(recycled)
}
