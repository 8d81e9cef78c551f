//! Binding owner identities to pool addresses.
//!
//! Both operations are idempotent: repeating a bind that already holds leaves
//! the pool untouched and returns [`BindOutcome::AlreadyBound`].

use crate::address::sorted_entries;
use crate::error::ControllerError;
use crds::{AllocationRecord, NodeIPPool, OwnerIdentity};
use std::net::IpAddr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The owner already held this address; nothing changed
    AlreadyBound(IpAddr),
    /// The pool was modified so that the owner holds this address
    Reserved(IpAddr),
}

impl BindOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, BindOutcome::Reserved(_))
    }
}

fn pool_name(pool: &NodeIPPool) -> String {
    pool.metadata.name.clone().unwrap_or_default()
}

/// Reserves the lowest free, unused entry for `owner`.
///
/// An owner that already holds an entry keeps it. Fails with `Exhausted` when
/// no entry is free.
pub fn bind_free_slot(
    pool: &mut NodeIPPool,
    owner: &OwnerIdentity,
    resource: &str,
) -> Result<BindOutcome, ControllerError> {
    let identity = owner.to_string();

    let slot = {
        let entries = sorted_entries(pool);
        if let Some((address, _)) = entries
            .iter()
            .find(|(_, key)| pool.spec.pool[*key].owner == identity)
        {
            return Ok(BindOutcome::AlreadyBound(*address));
        }

        entries
            .into_iter()
            .find(|(_, key)| pool.spec.pool[*key].is_free() && !pool.is_used(key))
            .map(|(address, key)| (address, key.to_string()))
    };

    let Some((address, key)) = slot else {
        return Err(ControllerError::Exhausted(format!(
            "NodeIPPool {} has no free address for {}",
            pool_name(pool),
            identity
        )));
    };

    pool.spec.pool.insert(key, AllocationRecord::reserved(identity, resource));
    Ok(BindOutcome::Reserved(address))
}

/// Records `owner` at the address the pod actually received.
///
/// Any other entry carrying the same owner is released so the owner appears
/// at most once. Fails with `MalformedData` if `address` is not in the pool.
pub fn bind_resolved_address(
    pool: &mut NodeIPPool,
    owner: &OwnerIdentity,
    address: IpAddr,
    resource: &str,
) -> Result<BindOutcome, ControllerError> {
    let identity = owner.to_string();
    let name = pool_name(pool);

    let (target, stale) = {
        let entries = sorted_entries(pool);
        let target = entries
            .iter()
            .find(|(entry, _)| *entry == address)
            .map(|(_, key)| key.to_string());
        let stale: Vec<String> = entries
            .iter()
            .filter(|(entry, key)| *entry != address && pool.spec.pool[*key].owner == identity)
            .map(|(_, key)| key.to_string())
            .collect();
        (target, stale)
    };

    let Some(target) = target else {
        return Err(ControllerError::MalformedData(format!(
            "address {} of {} is not in NodeIPPool {}",
            address, resource, name
        )));
    };

    let mut changed = false;
    for key in stale {
        pool.spec.pool.insert(key, AllocationRecord::default());
        changed = true;
    }

    if let Some(record) = pool.spec.pool.get_mut(&target) {
        if record.owner != identity {
            if !record.is_free() {
                warn!(
                    "Address {} in NodeIPPool {} recorded for {}, now held by {}",
                    target, name, record.owner, identity
                );
            }
            *record = AllocationRecord::reserved(identity, resource);
            changed = true;
        }
    }

    Ok(if changed {
        BindOutcome::Reserved(address)
    } else {
        BindOutcome::AlreadyBound(address)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pool_with;
    use crds::{NodeIPPoolStatus, UsedRecord};

    fn owner(raw: &str) -> OwnerIdentity {
        raw.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn mark_used(pool: &mut NodeIPPool, addresses: &[&str]) {
        let used = addresses
            .iter()
            .map(|a| (a.to_string(), UsedRecord::default()))
            .collect();
        pool.status = Some(NodeIPPoolStatus { used });
    }

    fn holders(pool: &NodeIPPool, identity: &str) -> usize {
        pool.spec.pool.values().filter(|r| r.owner == identity).count()
    }

    #[test]
    fn test_free_slot_picks_lowest_free_unused() {
        let mut pool = pool_with("node-a", &[
            ("10.0.0.10", "", ""),
            ("10.0.0.9", "", ""),
            ("10.0.0.2", "ns/Deployment/other", "ns/other-1"),
            ("10.0.0.3", "", ""),
        ]);
        mark_used(&mut pool, &["10.0.0.3"]);

        let outcome = bind_free_slot(&mut pool, &owner("ns/StatefulSet/db"), "ns/db-0").unwrap();

        assert_eq!(outcome, BindOutcome::Reserved(ip("10.0.0.9")));
        let record = &pool.spec.pool["10.0.0.9"];
        assert_eq!(record.owner, "ns/StatefulSet/db");
        assert_eq!(record.resource, "ns/db-0");
    }

    #[test]
    fn test_free_slot_is_idempotent() {
        let mut pool = pool_with("node-a", &[("10.0.0.1", "", ""), ("10.0.0.2", "", "")]);
        let db = owner("ns/StatefulSet/db");

        let first = bind_free_slot(&mut pool, &db, "ns/db-0").unwrap();
        let snapshot = pool.clone();
        let second = bind_free_slot(&mut pool, &db, "ns/db-0").unwrap();

        assert_eq!(first, BindOutcome::Reserved(ip("10.0.0.1")));
        assert_eq!(second, BindOutcome::AlreadyBound(ip("10.0.0.1")));
        assert_eq!(pool, snapshot);
        assert_eq!(holders(&pool, "ns/StatefulSet/db"), 1);
    }

    #[test]
    fn test_free_slot_exhausted_leaves_pool_untouched() {
        let mut pool = pool_with("node-a", &[
            ("10.0.0.1", "ns/Deployment/a", ""),
            ("10.0.0.2", "", ""),
        ]);
        mark_used(&mut pool, &["10.0.0.2"]);
        let snapshot = pool.clone();

        let result = bind_free_slot(&mut pool, &owner("ns/Deployment/b"), "ns/b-1");

        assert!(matches!(result, Err(ControllerError::Exhausted(_))));
        assert_eq!(pool, snapshot);
    }

    #[test]
    fn test_resolved_address_records_owner() {
        let mut pool = pool_with("node-a", &[("10.0.0.1", "", ""), ("10.0.0.2", "", "")]);

        let outcome = bind_resolved_address(&mut pool, &owner("ns/DaemonSet/agent"), ip("10.0.0.2"), "ns/agent-x").unwrap();

        assert_eq!(outcome, BindOutcome::Reserved(ip("10.0.0.2")));
        assert_eq!(pool.spec.pool["10.0.0.2"].owner, "ns/DaemonSet/agent");
    }

    #[test]
    fn test_resolved_address_moves_owner_and_stays_unique() {
        let mut pool = pool_with("node-a", &[
            ("10.0.0.1", "ns/DaemonSet/agent", "ns/agent-x"),
            ("10.0.0.2", "", ""),
        ]);
        let agent = owner("ns/DaemonSet/agent");

        let moved = bind_resolved_address(&mut pool, &agent, ip("10.0.0.2"), "ns/agent-y").unwrap();
        assert_eq!(moved, BindOutcome::Reserved(ip("10.0.0.2")));
        assert!(pool.spec.pool["10.0.0.1"].is_free());
        assert_eq!(holders(&pool, "ns/DaemonSet/agent"), 1);

        let again = bind_resolved_address(&mut pool, &agent, ip("10.0.0.2"), "ns/agent-y").unwrap();
        assert_eq!(again, BindOutcome::AlreadyBound(ip("10.0.0.2")));
    }

    #[test]
    fn test_resolved_address_outside_pool_is_malformed() {
        let mut pool = pool_with("node-a", &[("10.0.0.1", "", "")]);
        let snapshot = pool.clone();

        let result = bind_resolved_address(&mut pool, &owner("ns/Job/batch"), ip("10.9.9.9"), "ns/batch-1");

        assert!(matches!(result, Err(ControllerError::MalformedData(_))));
        assert_eq!(pool, snapshot);
    }
}
