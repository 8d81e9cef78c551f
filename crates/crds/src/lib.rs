//! Node IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and identity types shared by the
//! node IPAM controller and its clients.

pub mod node_ip_pool;
pub mod owner;

pub use node_ip_pool::*;
pub use owner::*;
