//! Projection handlers for leaf clusters
//!
//! A leaf cluster is projected into the root through one of three handlers,
//! picked once by the mode classifier. Every handler provides the same
//! capability set: planning and materializing the synthetic root nodes,
//! resolving which leaf nodes and pods back each of them, and reconciling
//! their status.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    DaemonEndpoint, Node, NodeAddress, NodeCondition, NodeDaemonEndpoints, NodeStatus,
    NodeSystemInfo, Pod, Taint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{error, info, warn};

use crate::crd::{Cluster, NodeSelector};
use crate::error::{AggregateError, Error, Result};

use super::address::AddressTranslator;
use super::conditions::{self, ClusterConditionStore};
use super::health;
use super::leaf_mode::{self, LeafMode};
use super::resources::calculate_cluster_resources;
use super::retry::retry_on_conflict;
use super::selector::format_label_selector;

/// Prefix for ALL/PARTY synthetic node names
pub const NODE_PREFIX: &str = "canopy-";

/// Annotation naming the leaf cluster a synthetic node belongs to
pub const OWNED_BY_CLUSTER_ANNOTATION: &str = "canopy.io/owned-by-cluster";

/// Annotation carrying the projection mode of a synthetic node
pub const NODE_MODE_ANNOTATION: &str = "canopy.io/node-mode";
pub const NODE_MODE_ALL: &str = "one2cluster";
pub const NODE_MODE_PARTY: &str = "one2party";

/// Label stamped on every synthetic node
pub const SYNTHETIC_NODE_LABEL: &str = "canopy.io/node";

/// Well-known role label identifying leaf control-plane nodes
pub const LABEL_NODE_ROLE_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";

/// Kubernetes object names are capped at 63 characters
pub const MAX_NODE_NAME_LEN: usize = 63;

/// Taint applied to every NODE-mode synthetic node.
#[derive(Clone, Debug)]
pub struct SyntheticTaint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

impl Default for SyntheticTaint {
    fn default() -> Self {
        Self {
            key: "canopy.io/node".to_string(),
            value: "canopy".to_string(),
            effect: "NoSchedule".to_string(),
        }
    }
}

impl SyntheticTaint {
    pub fn to_taint(&self) -> Taint {
        Taint {
            key: self.key.clone(),
            value: Some(self.value.clone()),
            effect: self.effect.clone(),
            time_added: None,
        }
    }
}

/// A synthetic node the handler intends to materialize: its name and the
/// leaf-model selector backing it.
#[derive(Clone, Debug, PartialEq)]
pub struct RootNodePlan {
    pub name: String,
    pub selector: NodeSelector,
}

/// The status (and, for NODE mode, taints) to write to one synthetic node.
pub struct DesiredNodeState {
    pub status: NodeStatus,
    pub taints: Option<Vec<Taint>>,
}

/// State shared by all three projection handlers.
pub struct HandlerCore {
    cluster: Cluster,
    root_client: Client,
    leaf_client: Client,
    condition_store: Arc<ClusterConditionStore>,
    translator: Arc<dyn AddressTranslator>,
    synthetic_taint: SyntheticTaint,
}

impl HandlerCore {
    fn cluster_name(&self) -> String {
        self.cluster.name_any()
    }

    /// Get-or-create one synthetic node in the root. An existing node is
    /// returned unchanged; anything but NotFound aborts.
    async fn get_or_create_node(
        &self,
        name: &str,
        listen_port: i32,
        kubelet_version: &str,
        mode: LeafMode,
    ) -> Result<Node> {
        let api: Api<Node> = Api::all(self.root_client.clone());
        match api.get(name).await {
            Ok(existing) => Ok(existing),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let mut node = build_node_template(name);
                let annotations = node.metadata.annotations.get_or_insert_with(BTreeMap::new);
                annotations.insert(
                    OWNED_BY_CLUSTER_ANNOTATION.to_string(),
                    self.cluster_name(),
                );
                match mode {
                    LeafMode::All => {
                        annotations
                            .insert(NODE_MODE_ANNOTATION.to_string(), NODE_MODE_ALL.to_string());
                    }
                    LeafMode::Party => {
                        annotations.insert(
                            NODE_MODE_ANNOTATION.to_string(),
                            NODE_MODE_PARTY.to_string(),
                        );
                    }
                    LeafMode::Node => {}
                }
                node.status = Some(NodeStatus {
                    node_info: Some(NodeSystemInfo {
                        kubelet_version: kubelet_version.to_string(),
                        ..Default::default()
                    }),
                    daemon_endpoints: Some(NodeDaemonEndpoints {
                        kubelet_endpoint: Some(DaemonEndpoint { port: listen_port }),
                    }),
                    ..Default::default()
                });

                info!(
                    "Creating synthetic node {name} for cluster {}",
                    self.cluster_name()
                );
                Ok(api.create(&PostParams::default(), &node).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Leaf-reported addresses of `leaf_node`, rewritten for the root.
    async fn translated_addresses(&self, leaf_node: &Node) -> Result<Vec<NodeAddress>> {
        let addresses = leaf_node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_deref())
            .unwrap_or_default();
        self.translator
            .translate(&self.cluster_name(), addresses)
            .await
    }

    /// Ready override for a reachable leaf whose control plane is down. A
    /// failed list falls back to the healthy set.
    async fn check_all_master_nodes_not_ready(&self) -> Vec<NodeCondition> {
        let api: Api<Node> = Api::all(self.leaf_client.clone());
        let params = ListParams::default().labels(LABEL_NODE_ROLE_CONTROL_PLANE);
        match api.list(&params).await {
            Ok(list) => master_ready_conditions(&list.items),
            Err(err) => {
                error!(
                    "Error listing master nodes in leaf cluster {}: {err}",
                    self.cluster_name()
                );
                conditions::node_conditions()
            }
        }
    }

    /// Shared ALL/PARTY status computation: probe the leaf, debounce the
    /// Ready condition, and aggregate capacity unless the cluster is offline.
    async fn aggregated_state(
        &self,
        handler: &dyn LeafModelHandler,
        root_node: &Node,
        leaf_nodes: &[Node],
        selector: &NodeSelector,
    ) -> Result<DesiredNodeState> {
        let cluster_name = self.cluster_name();
        let online = health::is_online(&self.leaf_client, &cluster_name).await;
        let observed = conditions::observed_ready_conditions(online);
        let effective = self.condition_store.threshold_adjusted_ready_conditions(
            &cluster_name,
            root_node,
            observed,
        );
        let effective_ready = conditions::is_ready(&effective);

        let mut status = root_node.status.clone().unwrap_or_default();
        let addresses = self.translated_addresses(&leaf_nodes[0]).await?;

        if !online && !effective_ready {
            // Offline fast-path: conditions and addresses only, capacity untouched.
            info!(
                "Cluster {cluster_name} still offline after {:?}, ensuring offline is set on {}",
                self.condition_store.failure_threshold(),
                root_node.name_any()
            );
            status.conditions = Some(effective);
            status.addresses = Some(addresses);
            return Ok(DesiredNodeState {
                status,
                taints: None,
            });
        }

        status.conditions = Some(if online && effective_ready {
            self.check_all_master_nodes_not_ready().await
        } else {
            effective
        });

        let pods = handler.get_leaf_pods(root_node, selector).await?;
        let cluster_resources = calculate_cluster_resources(leaf_nodes, &pods);
        status.allocatable = Some(cluster_resources.clone());
        status.capacity = Some(cluster_resources);
        status.addresses = Some(addresses);

        Ok(DesiredNodeState {
            status,
            taints: None,
        })
    }
}

/// Capability set of a projection mode, selected once by the classifier.
#[async_trait]
pub trait LeafModelHandler: Send + Sync {
    /// The projection mode this handler implements.
    fn leaf_mode(&self) -> LeafMode;

    fn core(&self) -> &HandlerCore;

    /// Names and backing selectors of the synthetic nodes for this cluster.
    fn root_node_plan(&self) -> Vec<RootNodePlan>;

    /// The leaf nodes backing a synthetic root node.
    async fn get_leaf_nodes(
        &self,
        root_node: &Node,
        selector: &NodeSelector,
    ) -> Result<Vec<Node>>;

    /// The leaf pods counted against a synthetic root node.
    async fn get_leaf_pods(&self, root_node: &Node, selector: &NodeSelector) -> Result<Vec<Pod>>;

    /// Desired status for one synthetic node, computed from the fetched
    /// root node and the leaf nodes backing it.
    async fn desired_state(
        &self,
        root_node: &Node,
        leaf_nodes: &[Node],
        selector: &NodeSelector,
    ) -> Result<DesiredNodeState>;

    /// Materialize the planned synthetic nodes in the root, idempotently.
    /// Returns the nodes plus the selector map keyed by node name.
    async fn create_root_nodes(
        &self,
        listen_port: i32,
        kubelet_version: &str,
    ) -> Result<(Vec<Node>, HashMap<String, NodeSelector>)> {
        let core = self.core();
        let mut nodes = Vec::new();
        let mut selectors = HashMap::new();
        for plan in self.root_node_plan() {
            let node = core
                .get_or_create_node(&plan.name, listen_port, kubelet_version, self.leaf_mode())
                .await?;
            nodes.push(node);
            selectors.insert(plan.name, plan.selector);
        }
        Ok((nodes, selectors))
    }

    /// One conflict-retried status transaction for a single synthetic node.
    async fn try_update_node_status(
        &self,
        node_name: &str,
        selector: &NodeSelector,
    ) -> Result<()> {
        let core = self.core();
        let api: Api<Node> = Api::all(core.root_client.clone());

        // TODO: recreate the root node here if it was deleted out of band;
        // today the next materialization pass restores it.
        let root_node = api
            .get(node_name)
            .await
            .map_err(|err| Error::RootNodeFetch(node_name.to_string(), err))?;

        let leaf_nodes = self.get_leaf_nodes(&root_node, selector).await?;
        if leaf_nodes.is_empty() {
            return Err(Error::EmptyLeafNodes(node_name.to_string()));
        }

        let desired = self.desired_state(&root_node, &leaf_nodes, selector).await?;

        let mut updated = root_node;
        updated.status = Some(desired.status);
        api.replace_status(
            node_name,
            &PostParams::default(),
            serde_json::to_vec(&updated)?,
        )
        .await?;

        if let Some(taints) = desired.taints {
            patch_node_taints(&core.root_client, node_name, &taints).await?;
        }
        Ok(())
    }

    /// Reconcile the status of every synthetic node of this cluster.
    ///
    /// Nodes are processed sequentially; failures are collected and returned
    /// as one aggregate so a broken node does not starve the others.
    async fn update_root_node_status(
        &self,
        nodes: &[Node],
        selectors: &HashMap<String, NodeSelector>,
    ) -> Result<()> {
        let mut errors = Vec::new();
        for node in nodes {
            let node_name = node.name_any();
            let Some(selector) = selectors.get(&node_name) else {
                warn!("Have no node selector for root node {node_name}, skipping");
                continue;
            };
            let result =
                retry_on_conflict(|| self.try_update_node_status(&node_name, selector)).await;
            if let Err(err) = result {
                warn!("Failed to update status of root node {node_name}: {err}");
                errors.push(err);
            }
        }
        AggregateError::into_result(errors)
    }
}

/// Merge-patch the taints of a synthetic node.
async fn patch_node_taints(client: &Client, node_name: &str, taints: &[Taint]) -> Result<()> {
    let api: Api<Node> = Api::all(client.clone());
    let patch = json!({ "spec": { "taints": taints } });
    api.patch(node_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Whole leaf projected as a single synthetic node.
pub struct AllModeHandler {
    core: HandlerCore,
}

impl AllModeHandler {
    pub(crate) fn plan(cluster: &Cluster) -> Vec<RootNodePlan> {
        vec![RootNodePlan {
            name: truncate_node_name(&format!("{NODE_PREFIX}{}", cluster.name_any())),
            selector: NodeSelector::default(),
        }]
    }
}

#[async_trait]
impl LeafModelHandler for AllModeHandler {
    fn leaf_mode(&self) -> LeafMode {
        LeafMode::All
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn root_node_plan(&self) -> Vec<RootNodePlan> {
        Self::plan(&self.core.cluster)
    }

    async fn get_leaf_nodes(
        &self,
        _root_node: &Node,
        _selector: &NodeSelector,
    ) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.core.leaf_client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_leaf_pods(&self, root_node: &Node, selector: &NodeSelector) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.core.leaf_client.clone());
        let mut pods = Vec::new();
        for leaf_node in self.get_leaf_nodes(root_node, selector).await? {
            let params =
                ListParams::default().fields(&format!("spec.nodeName={}", leaf_node.name_any()));
            pods.extend(api.list(&params).await?.items);
        }
        Ok(pods)
    }

    async fn desired_state(
        &self,
        root_node: &Node,
        leaf_nodes: &[Node],
        selector: &NodeSelector,
    ) -> Result<DesiredNodeState> {
        self.core
            .aggregated_state(self, root_node, leaf_nodes, selector)
            .await
    }
}

/// Leaf partitioned by label selectors, one synthetic node per leaf model.
pub struct PartyModeHandler {
    core: HandlerCore,
}

impl PartyModeHandler {
    pub(crate) fn plan(cluster: &Cluster) -> Vec<RootNodePlan> {
        cluster
            .leaf_models()
            .iter()
            .enumerate()
            .map(|(index, model)| RootNodePlan {
                name: truncate_node_name(&format!(
                    "{NODE_PREFIX}{}-{index}",
                    model.leaf_node_name
                )),
                selector: model.node_selector.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LeafModelHandler for PartyModeHandler {
    fn leaf_mode(&self) -> LeafMode {
        LeafMode::Party
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn root_node_plan(&self) -> Vec<RootNodePlan> {
        Self::plan(&self.core.cluster)
    }

    async fn get_leaf_nodes(
        &self,
        _root_node: &Node,
        selector: &NodeSelector,
    ) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.core.leaf_client.clone());
        let mut params = ListParams::default();
        if let Some(label_selector) = &selector.label_selector {
            params = params.labels(&format_label_selector(label_selector));
        }
        Ok(api.list(&params).await?.items)
    }

    async fn get_leaf_pods(&self, _root_node: &Node, _selector: &NodeSelector) -> Result<Vec<Pod>> {
        // Party projections count pods cluster-wide, across all namespaces.
        let api: Api<Pod> = Api::all(self.core.leaf_client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn desired_state(
        &self,
        root_node: &Node,
        leaf_nodes: &[Node],
        selector: &NodeSelector,
    ) -> Result<DesiredNodeState> {
        self.core
            .aggregated_state(self, root_node, leaf_nodes, selector)
            .await
    }
}

/// One-to-one projection: each declared leaf node becomes its own root node.
pub struct NodeModeHandler {
    core: HandlerCore,
}

impl NodeModeHandler {
    pub(crate) fn plan(cluster: &Cluster) -> Vec<RootNodePlan> {
        cluster
            .leaf_models()
            .iter()
            .filter_map(|model| {
                let node_name = model.node_selector.node_name.as_deref().unwrap_or_default();
                if node_name.is_empty() {
                    warn!(
                        "Leaf model {:?} of cluster {} has no node name, skipping",
                        model.leaf_node_name,
                        cluster.name_any()
                    );
                    return None;
                }
                Some(RootNodePlan {
                    name: truncate_node_name(node_name),
                    selector: model.node_selector.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl LeafModelHandler for NodeModeHandler {
    fn leaf_mode(&self) -> LeafMode {
        LeafMode::Node
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn root_node_plan(&self) -> Vec<RootNodePlan> {
        Self::plan(&self.core.cluster)
    }

    async fn get_leaf_nodes(
        &self,
        root_node: &Node,
        _selector: &NodeSelector,
    ) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.core.leaf_client.clone());
        let params =
            ListParams::default().fields(&format!("metadata.name={}", root_node.name_any()));
        Ok(api.list(&params).await?.items)
    }

    async fn get_leaf_pods(&self, root_node: &Node, _selector: &NodeSelector) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.core.leaf_client.clone());
        let params =
            ListParams::default().fields(&format!("spec.nodeName={}", root_node.name_any()));
        Ok(api.list(&params).await?.items)
    }

    async fn desired_state(
        &self,
        _root_node: &Node,
        leaf_nodes: &[Node],
        _selector: &NodeSelector,
    ) -> Result<DesiredNodeState> {
        // The synthetic node mirrors its leaf counterpart one-to-one.
        let leaf_node = &leaf_nodes[0];
        let mut status = leaf_node.status.clone().unwrap_or_default();
        status.addresses = Some(self.core.translated_addresses(leaf_node).await?);

        Ok(DesiredNodeState {
            status,
            taints: Some(merged_taints(leaf_node, self.core.synthetic_taint.to_taint())),
        })
    }
}

/// Classify `cluster` and build the matching projection handler.
pub fn new_leaf_model_handler(
    cluster: &Cluster,
    root_client: Client,
    leaf_client: Client,
    condition_store: Arc<ClusterConditionStore>,
    translator: Arc<dyn AddressTranslator>,
    synthetic_taint: SyntheticTaint,
) -> Arc<dyn LeafModelHandler> {
    let core = HandlerCore {
        cluster: cluster.clone(),
        root_client,
        leaf_client,
        condition_store,
        translator,
        synthetic_taint,
    };
    match leaf_mode::classify(cluster) {
        LeafMode::All => Arc::new(AllModeHandler { core }),
        LeafMode::Party => Arc::new(PartyModeHandler { core }),
        LeafMode::Node => Arc::new(NodeModeHandler { core }),
    }
}

/// Condition set for a reachable leaf, given its control-plane nodes: the
/// healthy set when any master has Ready/True, the NotReady override when
/// none does.
pub(crate) fn master_ready_conditions(masters: &[Node]) -> Vec<NodeCondition> {
    let any_master_ready = masters.iter().any(|node| {
        node.status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .is_some_and(conditions::is_ready)
    });
    if any_master_ready {
        conditions::node_conditions()
    } else {
        conditions::leaf_masters_not_ready_conditions()
    }
}

/// Leaf taints plus the mandatory synthetic taint.
pub(crate) fn merged_taints(leaf_node: &Node, synthetic_taint: Taint) -> Vec<Taint> {
    let mut taints = leaf_node
        .spec
        .as_ref()
        .and_then(|s| s.taints.clone())
        .unwrap_or_default();
    taints.push(synthetic_taint);
    taints
}

/// Fixed template every synthetic node starts from.
pub(crate) fn build_node_template(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                (SYNTHETIC_NODE_LABEL.to_string(), "true".to_string()),
                ("kubernetes.io/role".to_string(), "agent".to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Clip a generated name to the 63-character object-name bound.
pub(crate) fn truncate_node_name(name: &str) -> String {
    if name.len() <= MAX_NODE_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_NODE_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
