//! Pool address arithmetic.
//!
//! Pool keys are textual on the wire but compared numerically here, so that
//! `10.0.0.10` sorts after `10.0.0.9`.

use crate::error::ControllerError;
use crds::NodeIPPool;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// A node's pod CIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodRange {
    network: IpNetwork,
}

impl PodRange {
    pub fn parse(cidr: &str) -> Result<Self, ControllerError> {
        let network = cidr
            .trim()
            .parse::<IpNetwork>()
            .map_err(|e| ControllerError::MalformedData(format!("invalid pod CIDR '{}': {}", cidr, e)))?;
        Ok(Self { network })
    }

    /// First address of the range
    pub fn first(&self) -> IpAddr {
        self.network.network()
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.network.contains(address)
    }
}

impl std::fmt::Display for PodRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// The address numerically following `address`, if any.
pub fn next_address(address: IpAddr) -> Option<IpAddr> {
    match address {
        IpAddr::V4(v4) => u32::from(v4).checked_add(1).map(|n| IpAddr::V4(Ipv4Addr::from(n))),
        IpAddr::V6(v6) => u128::from(v6).checked_add(1).map(|n| IpAddr::V6(Ipv6Addr::from(n))),
    }
}

/// Parsed pool entries sorted by address.
///
/// Keys that are not addresses are skipped with a warning; they stay in the
/// pool untouched.
pub fn sorted_entries(pool: &NodeIPPool) -> Vec<(IpAddr, &str)> {
    let mut entries: Vec<(IpAddr, &str)> = pool
        .spec
        .pool
        .keys()
        .filter_map(|key| match key.parse::<IpAddr>() {
            Ok(address) => Some((address, key.as_str())),
            Err(_) => {
                warn!(
                    "Ignoring unparseable address '{}' in NodeIPPool {}",
                    key,
                    pool.metadata.name.as_deref().unwrap_or("<unnamed>")
                );
                None
            }
        })
        .collect();
    entries.sort_unstable();
    entries
}
