//! Prints the NodeIPPool CustomResourceDefinition as YAML.
//!
//! `cargo run -p crds --bin crdgen > deploy/crds/nodeippool.yaml`

use crds::NodeIPPool;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&NodeIPPool::crd())?);
    Ok(())
}
