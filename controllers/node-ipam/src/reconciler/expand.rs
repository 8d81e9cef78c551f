//! Pool expansion.
//!
//! When a pool runs low on free entries, new addresses are appended from the
//! node's first pod CIDR, continuing after the highest address the pool
//! already holds in that range.

use crate::address::{PodRange, next_address, sorted_entries};
use crate::error::ControllerError;
use crds::{AllocationRecord, NodeIPPool};
use std::collections::HashSet;
use std::net::IpAddr;

/// Result of one expansion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Addresses appended to the pool, in order
    pub added: Vec<IpAddr>,
    /// The pod CIDR has no address left to hand out
    pub exhausted: bool,
}

/// Returns true if the pool should grow.
pub fn needs_expansion(pool: &NodeIPPool, low_watermark: usize) -> bool {
    pool.free_count() <= low_watermark
}

/// Appends up to `step` free entries to `pool` if it is at or below the
/// low watermark.
///
/// Fails with `MalformedData` when the pool has no usable first pod CIDR.
/// Running out of range is not an error; it is reported via
/// [`Expansion::exhausted`].
pub fn expand_pool(pool: &mut NodeIPPool, low_watermark: usize, step: usize) -> Result<Expansion, ControllerError> {
    if !needs_expansion(pool, low_watermark) {
        return Ok(Expansion::default());
    }

    let name = pool.metadata.name.clone().unwrap_or_default();
    let cidr = pool
        .spec
        .pod_cidrs
        .first()
        .ok_or_else(|| ControllerError::MalformedData(format!("NodeIPPool {} has no podCIDRs", name)))?;
    let range = PodRange::parse(cidr)?;

    let (existing, resume_after) = {
        let entries = sorted_entries(pool);
        let existing: HashSet<IpAddr> = entries.iter().map(|(address, _)| *address).collect();
        let resume_after = entries
            .iter()
            .rev()
            .map(|(address, _)| *address)
            .find(|address| range.contains(*address));
        (existing, resume_after)
    };

    let mut next = match resume_after {
        Some(highest) => next_address(highest),
        None => Some(range.first()),
    };

    let mut expansion = Expansion::default();
    while expansion.added.len() < step {
        let Some(candidate) = next.filter(|address| range.contains(*address)) else {
            expansion.exhausted = true;
            break;
        };
        if !existing.contains(&candidate) {
            pool.spec.pool.insert(candidate.to_string(), AllocationRecord::default());
            expansion.added.push(candidate);
        }
        next = next_address(candidate);
    }

    Ok(expansion)
}
