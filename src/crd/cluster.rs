//! Cluster Custom Resource Definition
//!
//! A Cluster represents one leaf cluster joined to the root. Its leaf-model
//! list decides how the leaf is projected: as a single synthetic node, as a
//! label-partitioned set of nodes, or one-to-one at node granularity.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "canopy.io",
    version = "v1alpha1",
    kind = "Cluster",
    shortname = "cc",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Kubeconfig granting access to the leaf cluster's API server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub cluster_tree_options: ClusterTreeOptions,
}

/// Projection settings for the leaf cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTreeOptions {
    /// How the leaf is carved into synthetic root nodes. Empty means the
    /// whole leaf is projected as one node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf_models: Option<Vec<LeafModel>>,
}

/// One synthetic root node backed by a subset of the leaf
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeafModel {
    /// Display name woven into the synthetic node's generated name
    #[serde(default)]
    pub leaf_node_name: String,

    #[serde(default)]
    pub node_selector: NodeSelector,
}

/// Picks the leaf nodes backing a synthetic node, either by label or by
/// concrete node name. All entries of one cluster are expected to be
/// homogeneous in shape.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    /// Concrete leaf node name for one-to-one projection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Label selector for partitioned projection
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub label_selector: Option<LabelSelector>,
}

impl NodeSelector {
    /// True when neither a node name nor a label selector is set.
    pub fn is_empty(&self) -> bool {
        self.node_name.as_deref().is_none_or(str::is_empty)
            && self
                .label_selector
                .as_ref()
                .is_none_or(|s| *s == LabelSelector::default())
    }
}

impl Cluster {
    /// Declared leaf models, empty when the whole leaf is one node.
    pub fn leaf_models(&self) -> &[LeafModel] {
        self.spec
            .cluster_tree_options
            .leaf_models
            .as_deref()
            .unwrap_or_default()
    }
}
