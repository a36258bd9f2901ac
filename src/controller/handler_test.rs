//! Unit tests for projection planning and synthetic node construction.
//!
//! Covers: per-mode node name generation, the 63-character name bound,
//! selector-map cardinality, taint merging, the master-not-ready override,
//! and the node template.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus, Taint};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    use crate::controller::handler::{
        build_node_template, master_ready_conditions, merged_taints, truncate_node_name,
        AllModeHandler, NodeModeHandler, PartyModeHandler, SyntheticTaint, MAX_NODE_NAME_LEN,
        NODE_PREFIX, SYNTHETIC_NODE_LABEL,
    };
    use crate::crd::{Cluster, ClusterSpec, ClusterTreeOptions, LeafModel, NodeSelector};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn cluster(name: &str, models: Option<Vec<LeafModel>>) -> Cluster {
        Cluster::new(
            name,
            ClusterSpec {
                kubeconfig: None,
                cluster_tree_options: ClusterTreeOptions {
                    leaf_models: models,
                },
            },
        )
    }

    fn party_model(leaf_node_name: &str, key: &str, value: &str) -> LeafModel {
        LeafModel {
            leaf_node_name: leaf_node_name.to_string(),
            node_selector: NodeSelector {
                node_name: None,
                label_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
                    ..Default::default()
                }),
            },
        }
    }

    fn node_model(node_name: &str) -> LeafModel {
        LeafModel {
            leaf_node_name: String::new(),
            node_selector: NodeSelector {
                node_name: Some(node_name.to_string()),
                label_selector: None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // ALL mode planning
    // -----------------------------------------------------------------------

    #[test]
    fn test_all_mode_plans_single_prefixed_node() {
        let plan = AllModeHandler::plan(&cluster("c1", None));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, format!("{NODE_PREFIX}c1"));
        assert!(plan[0].selector.is_empty());
    }

    #[test]
    fn test_all_mode_plan_is_deterministic() {
        let c = cluster("c1", None);
        assert_eq!(AllModeHandler::plan(&c), AllModeHandler::plan(&c));
    }

    // -----------------------------------------------------------------------
    // PARTY mode planning
    // -----------------------------------------------------------------------

    #[test]
    fn test_party_mode_plans_one_node_per_model() {
        let models = vec![
            party_model("gpu", "tier", "gpu"),
            party_model("cpu", "tier", "cpu"),
        ];
        let plan = PartyModeHandler::plan(&cluster("c3", Some(models)));

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, format!("{NODE_PREFIX}gpu-0"));
        assert_eq!(plan[1].name, format!("{NODE_PREFIX}cpu-1"));
    }

    #[test]
    fn test_party_mode_plan_keeps_backing_selectors() {
        let models = vec![party_model("gpu", "tier", "gpu")];
        let plan = PartyModeHandler::plan(&cluster("c3", Some(models.clone())));

        assert_eq!(plan[0].selector, models[0].node_selector);
    }

    // -----------------------------------------------------------------------
    // NODE mode planning
    // -----------------------------------------------------------------------

    #[test]
    fn test_node_mode_plans_unprefixed_leaf_names() {
        let models = vec![node_model("worker-7"), node_model("worker-8")];
        let plan = NodeModeHandler::plan(&cluster("c2", Some(models)));

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "worker-7");
        assert_eq!(plan[1].name, "worker-8");
    }

    #[test]
    fn test_node_mode_skips_models_without_node_name() {
        let models = vec![node_model("worker-7"), node_model("")];
        let plan = NodeModeHandler::plan(&cluster("c2", Some(models)));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "worker-7");
    }

    // -----------------------------------------------------------------------
    // Name-length bound
    // -----------------------------------------------------------------------

    #[test]
    fn test_truncate_leaves_short_names_alone() {
        assert_eq!(truncate_node_name("worker-7"), "worker-7");
    }

    #[test]
    fn test_truncate_caps_at_63_characters() {
        let long = "n".repeat(100);
        let truncated = truncate_node_name(&long);
        assert_eq!(truncated.len(), MAX_NODE_NAME_LEN);
        assert_eq!(truncated, "n".repeat(MAX_NODE_NAME_LEN));
    }

    #[test]
    fn test_every_planned_name_respects_the_bound() {
        let long_cluster = cluster(&"c".repeat(80), None);
        let long_models = vec![party_model(&"p".repeat(80), "tier", "gpu")];

        for plan in AllModeHandler::plan(&long_cluster)
            .into_iter()
            .chain(PartyModeHandler::plan(&cluster("c", Some(long_models))))
        {
            assert!(plan.name.len() <= MAX_NODE_NAME_LEN, "name {}", plan.name);
        }
    }

    // -----------------------------------------------------------------------
    // Taint merging
    // -----------------------------------------------------------------------

    #[test]
    fn test_merged_taints_appends_synthetic_taint() {
        let leaf_node = Node {
            spec: Some(NodeSpec {
                taints: Some(vec![Taint {
                    key: "foo".to_string(),
                    value: Some("bar".to_string()),
                    effect: "NoSchedule".to_string(),
                    time_added: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let taints = merged_taints(&leaf_node, SyntheticTaint::default().to_taint());
        assert_eq!(taints.len(), 2);
        assert_eq!(taints[0].key, "foo");
        assert_eq!(taints[1].key, "canopy.io/node");
        assert_eq!(taints[1].value.as_deref(), Some("canopy"));
        assert_eq!(taints[1].effect, "NoSchedule");
    }

    #[test]
    fn test_merged_taints_on_untainted_leaf_node() {
        let taints = merged_taints(&Node::default(), SyntheticTaint::default().to_taint());
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "canopy.io/node");
    }

    // -----------------------------------------------------------------------
    // Master-not-ready override
    // -----------------------------------------------------------------------

    fn master_node(ready: bool) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn ready_condition(conditions: &[NodeCondition]) -> &NodeCondition {
        conditions
            .iter()
            .find(|c| c.type_ == "Ready")
            .expect("condition set must contain Ready")
    }

    #[test]
    fn test_override_fires_when_all_masters_not_ready() {
        let conditions = master_ready_conditions(&[master_node(false), master_node(false)]);

        let ready = ready_condition(&conditions);
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some("LeafNodesNotReady"));
    }

    #[test]
    fn test_no_override_when_any_master_is_ready() {
        let conditions = master_ready_conditions(&[master_node(false), master_node(true)]);

        let ready = ready_condition(&conditions);
        assert_eq!(ready.status, "True", "one Ready master keeps the healthy set");
        assert_eq!(ready.reason.as_deref(), Some("KubeletReady"));
    }

    #[test]
    fn test_master_without_conditions_counts_as_not_ready() {
        let conditions = master_ready_conditions(&[Node::default()]);

        let ready = ready_condition(&conditions);
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some("LeafNodesNotReady"));
    }

    // -----------------------------------------------------------------------
    // Node template
    // -----------------------------------------------------------------------

    #[test]
    fn test_node_template_carries_synthetic_label() {
        let node = build_node_template("canopy-c1");

        assert_eq!(node.metadata.name.as_deref(), Some("canopy-c1"));
        let labels = node.metadata.labels.unwrap();
        assert_eq!(labels.get(SYNTHETIC_NODE_LABEL).map(String::as_str), Some("true"));
        assert_eq!(
            labels.get("kubernetes.io/role").map(String::as_str),
            Some("agent")
        );
    }
}
