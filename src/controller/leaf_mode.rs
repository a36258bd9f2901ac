//! Projection mode classification for leaf clusters

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::crd::Cluster;

/// How a leaf cluster is projected into the root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LeafMode {
    /// The entire leaf is projected as a single synthetic node
    #[default]
    All,

    /// The leaf is partitioned by label selectors, one synthetic node per
    /// leaf-model entry
    Party,

    /// Each declared leaf node becomes its own synthetic root node
    Node,
}

impl std::fmt::Display for LeafMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeafMode::All => write!(f, "ALL"),
            LeafMode::Party => write!(f, "PARTY"),
            LeafMode::Node => write!(f, "NODE"),
        }
    }
}

/// Classify a cluster into its projection mode.
///
/// Only the first leaf-model entry is consulted; entries of one cluster are
/// expected to be homogeneous in shape. Anything unclassifiable falls back
/// to [`LeafMode::All`].
pub fn classify(cluster: &Cluster) -> LeafMode {
    let Some(first) = cluster.leaf_models().first() else {
        return LeafMode::All;
    };
    if first.node_selector.is_empty() {
        return LeafMode::All;
    }

    let has_label_selector = first
        .node_selector
        .label_selector
        .as_ref()
        .is_some_and(|s| *s != LabelSelector::default());
    if has_label_selector {
        LeafMode::Party
    } else if first
        .node_selector
        .node_name
        .as_deref()
        .is_some_and(|n| !n.is_empty())
    {
        LeafMode::Node
    } else {
        LeafMode::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, ClusterTreeOptions, LeafModel, NodeSelector};
    use std::collections::BTreeMap;

    fn cluster_with_models(models: Option<Vec<LeafModel>>) -> Cluster {
        Cluster::new(
            "c1",
            ClusterSpec {
                kubeconfig: None,
                cluster_tree_options: ClusterTreeOptions {
                    leaf_models: models,
                },
            },
        )
    }

    fn label_selector(key: &str, value: &str) -> LabelSelector {
        LabelSelector {
            match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_leaf_models_is_all() {
        assert_eq!(classify(&cluster_with_models(None)), LeafMode::All);
        assert_eq!(classify(&cluster_with_models(Some(vec![]))), LeafMode::All);
    }

    #[test]
    fn test_zero_valued_selector_is_all() {
        let models = vec![LeafModel {
            leaf_node_name: "whole".to_string(),
            node_selector: NodeSelector::default(),
        }];
        assert_eq!(classify(&cluster_with_models(Some(models))), LeafMode::All);
    }

    #[test]
    fn test_label_selector_is_party() {
        let models = vec![LeafModel {
            leaf_node_name: "gpu".to_string(),
            node_selector: NodeSelector {
                node_name: None,
                label_selector: Some(label_selector("tier", "gpu")),
            },
        }];
        assert_eq!(
            classify(&cluster_with_models(Some(models))),
            LeafMode::Party
        );
    }

    #[test]
    fn test_node_name_is_node() {
        let models = vec![LeafModel {
            leaf_node_name: String::new(),
            node_selector: NodeSelector {
                node_name: Some("worker-7".to_string()),
                label_selector: None,
            },
        }];
        assert_eq!(classify(&cluster_with_models(Some(models))), LeafMode::Node);
    }

    #[test]
    fn test_label_selector_wins_over_node_name() {
        let models = vec![LeafModel {
            leaf_node_name: "gpu".to_string(),
            node_selector: NodeSelector {
                node_name: Some("worker-7".to_string()),
                label_selector: Some(label_selector("tier", "gpu")),
            },
        }];
        assert_eq!(
            classify(&cluster_with_models(Some(models))),
            LeafMode::Party
        );
    }

    #[test]
    fn test_empty_zero_label_selector_falls_back_to_all() {
        let models = vec![LeafModel {
            leaf_node_name: "x".to_string(),
            node_selector: NodeSelector {
                node_name: Some(String::new()),
                label_selector: Some(LabelSelector::default()),
            },
        }];
        assert_eq!(classify(&cluster_with_models(Some(models))), LeafMode::All);
    }

    #[test]
    fn test_classification_only_reads_first_entry() {
        let models = vec![
            LeafModel {
                leaf_node_name: "gpu".to_string(),
                node_selector: NodeSelector {
                    node_name: None,
                    label_selector: Some(label_selector("tier", "gpu")),
                },
            },
            // A NODE-shaped trailing entry does not change the mode.
            LeafModel {
                leaf_node_name: String::new(),
                node_selector: NodeSelector {
                    node_name: Some("worker-7".to_string()),
                    label_selector: None,
                },
            },
        ];
        assert_eq!(
            classify(&cluster_with_models(Some(models))),
            LeafMode::Party
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let cluster = cluster_with_models(Some(vec![LeafModel {
            leaf_node_name: "gpu".to_string(),
            node_selector: NodeSelector {
                node_name: None,
                label_selector: Some(label_selector("tier", "gpu")),
            },
        }]));
        let first = classify(&cluster);
        for _ in 0..10 {
            assert_eq!(classify(&cluster), first);
        }
    }
}
