//! Custom resource definitions for the canopy API group

mod cluster;

pub use cluster::{Cluster, ClusterSpec, ClusterTreeOptions, LeafModel, NodeSelector};
