//! Address translation between leaf-reported and root-reachable addresses
//!
//! Leaf nodes report addresses valid inside the leaf's network. Before they
//! are published on a synthetic root node they pass through an injected
//! translation strategy, so deployments behind NAT or a per-cluster gateway
//! can rewrite them.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::NodeAddress;

use crate::error::Result;

#[async_trait]
pub trait AddressTranslator: Send + Sync {
    /// Rewrite leaf-reported addresses into addresses reachable from the
    /// root. Failure aborts the current reconciliation pass for that node.
    async fn translate(
        &self,
        cluster_name: &str,
        addresses: &[NodeAddress],
    ) -> Result<Vec<NodeAddress>>;
}

/// Identity translation for flat networks where leaf addresses are directly
/// routable from the root.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughTranslator;

#[async_trait]
impl AddressTranslator for PassthroughTranslator {
    async fn translate(
        &self,
        _cluster_name: &str,
        addresses: &[NodeAddress],
    ) -> Result<Vec<NodeAddress>> {
        Ok(addresses.to_vec())
    }
}

/// Static NAT table: addresses with an entry are rewritten, the rest pass
/// through unchanged.
#[derive(Clone, Debug, Default)]
pub struct SnatTranslator {
    mappings: HashMap<String, String>,
}

impl SnatTranslator {
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self { mappings }
    }
}

#[async_trait]
impl AddressTranslator for SnatTranslator {
    async fn translate(
        &self,
        _cluster_name: &str,
        addresses: &[NodeAddress],
    ) -> Result<Vec<NodeAddress>> {
        Ok(addresses
            .iter()
            .map(|addr| NodeAddress {
                type_: addr.type_.clone(),
                address: self
                    .mappings
                    .get(&addr.address)
                    .cloned()
                    .unwrap_or_else(|| addr.address.clone()),
            })
            .collect())
    }
}
