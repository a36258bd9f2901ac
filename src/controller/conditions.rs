//! Node condition helpers and the per-cluster Ready debouncer
//!
//! Raw online/offline observations from the leaf probe are converted into a
//! stable Ready condition: a cluster must be continuously offline for at
//! least the failure threshold before its synthetic nodes flip to NotReady.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tracing::debug;

/// Standard condition types following Kubernetes API conventions
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

fn condition(type_: &str, status: &str, reason: &str, message: &str) -> NodeCondition {
    let now = Time(Utc::now());
    NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_heartbeat_time: Some(now.clone()),
        last_transition_time: Some(now),
    }
}

/// Raw Ready condition set derived from one health probe.
pub fn observed_ready_conditions(online: bool) -> Vec<NodeCondition> {
    if online {
        vec![condition(
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "ClusterReady",
            "cluster is online and ready to accept workloads.",
        )]
    } else {
        vec![condition(
            CONDITION_TYPE_READY,
            CONDITION_STATUS_FALSE,
            "ClusterNotReachable",
            "cluster is not reachable.",
        )]
    }
}

/// Condition set published when all of the leaf's control-plane nodes are
/// NotReady even though the API server answers its readiness probe.
pub fn leaf_masters_not_ready_conditions() -> Vec<NodeCondition> {
    vec![condition(
        CONDITION_TYPE_READY,
        CONDITION_STATUS_FALSE,
        "LeafNodesNotReady",
        "all leaf cluster master nodes are not ready.",
    )]
}

/// Default healthy condition set for a synthetic node.
pub fn node_conditions() -> Vec<NodeCondition> {
    vec![
        condition(
            CONDITION_TYPE_READY,
            CONDITION_STATUS_TRUE,
            "KubeletReady",
            "kubelet is posting ready status",
        ),
        condition(
            "MemoryPressure",
            CONDITION_STATUS_FALSE,
            "KubeletHasSufficientMemory",
            "kubelet has sufficient memory available",
        ),
        condition(
            "DiskPressure",
            CONDITION_STATUS_FALSE,
            "KubeletHasNoDiskPressure",
            "kubelet has no disk pressure",
        ),
        condition(
            "PIDPressure",
            CONDITION_STATUS_FALSE,
            "KubeletHasSufficientPID",
            "kubelet has sufficient PID available",
        ),
        condition(
            "NetworkUnavailable",
            CONDITION_STATUS_FALSE,
            "RouteCreated",
            "RouteController created a route",
        ),
    ]
}

/// Find the Ready condition in a set.
pub fn find_ready_condition(conditions: &[NodeCondition]) -> Option<&NodeCondition> {
    conditions.iter().find(|c| c.type_ == CONDITION_TYPE_READY)
}

/// True when the set contains Ready with status True.
pub fn is_ready(conditions: &[NodeCondition]) -> bool {
    find_ready_condition(conditions).is_some_and(|c| c.status == CONDITION_STATUS_TRUE)
}

fn current_node_conditions(node: &Node) -> &[NodeCondition] {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
}

struct ConditionEntry {
    /// Last raw Ready status observed for the cluster
    observed_status: String,
    /// When that status was first observed
    probe_timestamp: Instant,
}

/// Per-cluster debounce state for the Ready condition.
///
/// Entries are keyed by cluster name and safe for concurrent reconciliations
/// of different clusters; `remove` is the hook for cluster deletion.
pub struct ClusterConditionStore {
    entries: RwLock<HashMap<String, ConditionEntry>>,
    failure_threshold: Duration,
}

impl ClusterConditionStore {
    pub fn new(failure_threshold: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            failure_threshold,
        }
    }

    pub fn failure_threshold(&self) -> Duration {
        self.failure_threshold
    }

    /// Drop the debounce state for a deleted cluster.
    pub fn remove(&self, cluster_name: &str) {
        self.entries.write().unwrap().remove(cluster_name);
    }

    /// Convert a raw observation into the effective condition set to publish.
    ///
    /// An offline observation is held back while the synthetic node is still
    /// Ready and the cluster has been offline for less than the failure
    /// threshold; the node's previous conditions are republished instead.
    /// Online observations always pass through immediately.
    pub fn threshold_adjusted_ready_conditions(
        &self,
        cluster_name: &str,
        root_node: &Node,
        observed: Vec<NodeCondition>,
    ) -> Vec<NodeCondition> {
        self.adjust_at(Instant::now(), cluster_name, root_node, observed)
    }

    fn adjust_at(
        &self,
        now: Instant,
        cluster_name: &str,
        root_node: &Node,
        observed: Vec<NodeCondition>,
    ) -> Vec<NodeCondition> {
        let Some(observed_ready) = find_ready_condition(&observed) else {
            return observed;
        };
        let observed_status = observed_ready.status.clone();

        let offline_since = {
            let mut entries = self.entries.write().unwrap();
            let entry = entries
                .entry(cluster_name.to_string())
                .or_insert_with(|| ConditionEntry {
                    observed_status: observed_status.clone(),
                    probe_timestamp: now,
                });
            if entry.observed_status != observed_status {
                entry.observed_status = observed_status.clone();
                entry.probe_timestamp = now;
            }
            entry.probe_timestamp
        };

        if observed_status != CONDITION_STATUS_TRUE {
            let current = current_node_conditions(root_node);
            let currently_ready = is_ready(current);
            if currently_ready && now.duration_since(offline_since) < self.failure_threshold {
                debug!(
                    "Cluster {cluster_name} offline for less than {:?}, keeping previous Ready condition",
                    self.failure_threshold
                );
                return current.to_vec();
            }
        }

        observed
    }
}
