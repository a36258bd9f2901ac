//! Controller module for Cluster reconciliation
//! This module classifies leaf clusters into projection modes, materializes
//! their synthetic nodes in the root, and keeps those nodes' status in sync
//! with observations from the leaf.

pub mod address;
pub mod conditions;
pub mod handler;
#[cfg(test)]
mod handler_test;
mod health;
pub mod leaf_mode;
mod reconciler;
pub mod resources;
mod retry;
mod selector;

pub use address::{AddressTranslator, PassthroughTranslator, SnatTranslator};
pub use conditions::ClusterConditionStore;
pub use handler::{new_leaf_model_handler, LeafModelHandler, SyntheticTaint};
pub use leaf_mode::LeafMode;
pub use reconciler::{run_controller, ControllerState, OperatorConfig, CLUSTER_FINALIZER};
pub use retry::retry_on_conflict;
