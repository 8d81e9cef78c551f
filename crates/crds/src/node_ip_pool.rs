//! NodeIPPool CRD
//!
//! Defines the per-node address pool handed out to workloads scheduled on
//! that node. One object exists per cluster node and carries the node's name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "ipam.nodepool.dev",
    version = "v1alpha1",
    kind = "NodeIPPool",
    shortname = "nipp",
    status = "NodeIPPoolStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"CIDRs","type":"string","jsonPath":".spec.podCIDRs"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeIPPoolSpec {
    /// Address ranges owned by the node, in priority order.
    /// Expansion only draws from the first range.
    #[serde(default, rename = "podCIDRs")]
    pub pod_cidrs: Vec<String>,

    /// Addresses handed to this node, keyed by their textual form
    #[serde(default)]
    pub pool: BTreeMap<String, AllocationRecord>,
}

/// Allocation state of a single pool address.
///
/// A record with an empty `owner` is free.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRecord {
    /// Owner identity (`<namespace>/<kind>/<name>`) of the workload that
    /// reserved the address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    /// Pod (`<namespace>/<name>`) that triggered the reservation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

impl AllocationRecord {
    /// Creates a reservation for `owner`, triggered by the pod `resource`.
    pub fn reserved(owner: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            resource: resource.into(),
        }
    }

    /// Returns true if nobody holds the address.
    pub fn is_free(&self) -> bool {
        self.owner.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeIPPoolStatus {
    /// Addresses bound to live workloads, reported by the dataplane.
    /// Never written by the controller.
    #[serde(default)]
    pub used: BTreeMap<String, UsedRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsedRecord {
    /// Dataplane resource holding the address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

impl NodeIPPool {
    /// Addresses reported in use by the dataplane.
    pub fn used(&self) -> Option<&BTreeMap<String, UsedRecord>> {
        self.status.as_ref().map(|s| &s.used)
    }

    /// Number of pool entries minus the number of used addresses.
    pub fn free_count(&self) -> usize {
        let used = self.used().map_or(0, BTreeMap::len);
        self.spec.pool.len().saturating_sub(used)
    }

    /// Returns true if the dataplane reports `address` as bound.
    pub fn is_used(&self, address: &str) -> bool {
        self.used().is_some_and(|used| used.contains_key(address))
    }
}
