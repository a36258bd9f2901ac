//! Cluster-wide resource aggregation for synthetic nodes
//!
//! The capacity of an ALL/PARTY synthetic node is what the backing leaf
//! nodes can still take: the sum of their allocatable resources minus the
//! requests of every non-terminal pod already counted against them,
//! clamped at zero.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

/// Parse a Kubernetes quantity into milli-units (1 CPU = 1000, 1 byte =
/// 1000). Handles plain values, the `m` suffix, and decimal/binary SI
/// suffixes.
pub fn parse_quantity(quantity: &Quantity) -> Option<i64> {
    let s = quantity.0.trim();
    if s.is_empty() {
        return None;
    }

    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+');
    let (number, suffix) = match split {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };

    let value: f64 = number.parse().ok()?;
    let multiplier: f64 = match suffix {
        "" => 1.0,
        "m" => 0.001,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };

    Some((value * multiplier * 1000.0).round() as i64)
}

/// Render milli-units back into a quantity: whole units where exact,
/// otherwise the `m` form.
fn quantity_from_millis(millis: i64) -> Quantity {
    if millis % 1000 == 0 {
        Quantity((millis / 1000).to_string())
    } else {
        Quantity(format!("{millis}m"))
    }
}

fn is_terminal(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed")
}

fn sum_into(totals: &mut BTreeMap<String, i64>, resources: &BTreeMap<String, Quantity>) {
    for (name, quantity) in resources {
        match parse_quantity(quantity) {
            Some(millis) => *totals.entry(name.clone()).or_default() += millis,
            None => warn!("Skipping unparseable quantity {:?} for {name}", quantity.0),
        }
    }
}

fn pods_total_requests(pods: &[Pod]) -> BTreeMap<String, i64> {
    let mut totals = BTreeMap::new();
    for pod in pods.iter().filter(|p| !is_terminal(p)) {
        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default();
        for container in containers {
            if let Some(requests) = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
            {
                sum_into(&mut totals, requests);
            }
        }
    }
    totals
}

/// Aggregate the backing leaf nodes into one resource list: Σ allocatable
/// across `nodes` minus Σ requests of non-terminal `pods`, clamped at zero.
pub fn calculate_cluster_resources(nodes: &[Node], pods: &[Pod]) -> BTreeMap<String, Quantity> {
    let mut allocatable = BTreeMap::new();
    for node in nodes {
        if let Some(node_allocatable) = node.status.as_ref().and_then(|s| s.allocatable.as_ref()) {
            sum_into(&mut allocatable, node_allocatable);
        }
    }

    let requested = pods_total_requests(pods);
    allocatable
        .into_iter()
        .map(|(name, total)| {
            let used = requested.get(&name).copied().unwrap_or(0);
            (name, quantity_from_millis((total - used).max(0)))
        })
        .collect()
}
