//! Main reconciler for Cluster resources
//!
//! Implements the controller pattern using kube-rs runtime: each Cluster is
//! reconciled by at most one task at a time, clusters run concurrently, and
//! every pass re-materializes the cluster's synthetic nodes and refreshes
//! their status.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    config::{KubeConfigOptions, Kubeconfig},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    ResourceExt,
};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::crd::Cluster;
use crate::error::{Error, Result};

use super::address::AddressTranslator;
use super::conditions::ClusterConditionStore;
use super::handler::{new_leaf_model_handler, SyntheticTaint};
use super::leaf_mode;

/// Finalizer used to drop per-cluster state when a Cluster is deleted
pub const CLUSTER_FINALIZER: &str = "cluster.canopy.io/finalizer";

/// Tunables of the operator, resolved once at startup.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Kubelet endpoint port stamped onto synthetic nodes
    pub listen_port: i32,
    /// Kubelet version stamped onto synthetic nodes
    pub kubelet_version: String,
    /// How long a leaf must be continuously unreachable before its Ready
    /// condition flips to False
    pub failure_threshold: Duration,
    /// Requeue interval between status passes of one cluster
    pub sync_period: Duration,
    pub synthetic_taint: SyntheticTaint,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            listen_port: 10250,
            kubelet_version: "v1.30.0".to_string(),
            failure_threshold: Duration::from_secs(30),
            sync_period: Duration::from_secs(30),
            synthetic_taint: SyntheticTaint::default(),
        }
    }
}

impl OperatorConfig {
    /// Defaults overridden by `CANOPY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(port) = env::var("CANOPY_LISTEN_PORT") {
            config.listen_port = port
                .parse()
                .map_err(|_| Error::ConfigError(format!("invalid CANOPY_LISTEN_PORT: {port}")))?;
        }
        if let Ok(version) = env::var("CANOPY_KUBELET_VERSION") {
            config.kubelet_version = version;
        }
        if let Ok(secs) = env::var("CANOPY_FAILURE_THRESHOLD_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::ConfigError(format!("invalid CANOPY_FAILURE_THRESHOLD_SECS: {secs}"))
            })?;
            config.failure_threshold = Duration::from_secs(secs);
        }
        if let Ok(secs) = env::var("CANOPY_SYNC_PERIOD_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::ConfigError(format!("invalid CANOPY_SYNC_PERIOD_SECS: {secs}"))
            })?;
            config.sync_period = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// A leaf client plus the kubeconfig it was built from, so a credential
/// rotation in the Cluster spec invalidates it.
struct CachedLeafClient {
    kubeconfig: String,
    client: Client,
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub config: OperatorConfig,
    pub condition_store: Arc<ClusterConditionStore>,
    pub translator: Arc<dyn AddressTranslator>,
    leaf_clients: RwLock<HashMap<String, CachedLeafClient>>,
}

impl ControllerState {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        translator: Arc<dyn AddressTranslator>,
    ) -> Self {
        let condition_store = Arc::new(ClusterConditionStore::new(config.failure_threshold));
        Self {
            client,
            config,
            condition_store,
            translator,
            leaf_clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for the leaf cluster, built once from the kubeconfig in the
    /// spec and reused across passes until that kubeconfig changes.
    async fn leaf_client(&self, cluster: &Cluster) -> Result<Client> {
        let cluster_name = cluster.name_any();
        let kubeconfig_yaml = kubeconfig_for(cluster)?;

        {
            let cache = self.leaf_clients.read().await;
            if let Some(cached) = cache.get(&cluster_name) {
                if cached.kubeconfig == kubeconfig_yaml {
                    return Ok(cached.client.clone());
                }
            }
        }

        let client = build_leaf_client(kubeconfig_yaml).await?;
        info!("Built leaf client for cluster {cluster_name}");
        self.leaf_clients.write().await.insert(
            cluster_name,
            CachedLeafClient {
                kubeconfig: kubeconfig_yaml.to_string(),
                client: client.clone(),
            },
        );
        Ok(client)
    }

    /// Drop the cached leaf client of a deleted cluster.
    async fn evict_leaf_client(&self, cluster_name: &str) {
        self.leaf_clients.write().await.remove(cluster_name);
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let clusters: Api<Cluster> = Api::all(client.clone());

    info!("Starting Cluster controller");

    // Verify CRD exists
    match clusters.list(&Default::default()).await {
        Ok(_) => info!("Cluster CRD is available"),
        Err(e) => {
            error!("Cluster CRD not found. Please install the CRD first: {e:?}");
            return Err(Error::ConfigError("Cluster CRD not installed".to_string()));
        }
    }

    Controller::new(clusters, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {obj:?}"),
                Err(e) => error!("Reconcile error: {e:?}"),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// Called whenever a Cluster changes or its requeue timer expires.
#[instrument(skip(ctx), fields(name = %cluster.name_any()))]
async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    let api: Api<Cluster> = Api::all(ctx.client.clone());

    info!(
        "Reconciling cluster {} (mode: {})",
        cluster.name_any(),
        leaf_mode::classify(&cluster)
    );

    finalizer(&api, CLUSTER_FINALIZER, cluster, |event| async {
        match event {
            Event::Apply(cluster) => apply_cluster(&ctx, &cluster).await,
            Event::Cleanup(cluster) => cleanup_cluster(&ctx, &cluster).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// Materialize the cluster's synthetic nodes and refresh their status.
async fn apply_cluster(ctx: &ControllerState, cluster: &Cluster) -> Result<Action> {
    let leaf_client = ctx.leaf_client(cluster).await?;
    let handler = new_leaf_model_handler(
        cluster,
        ctx.client.clone(),
        leaf_client,
        ctx.condition_store.clone(),
        ctx.translator.clone(),
        ctx.config.synthetic_taint.clone(),
    );

    let (nodes, selectors) = handler
        .create_root_nodes(ctx.config.listen_port, &ctx.config.kubelet_version)
        .await?;
    info!(
        "Ensured {} synthetic node(s) for cluster {}",
        nodes.len(),
        cluster.name_any()
    );

    handler.update_root_node_status(&nodes, &selectors).await?;

    Ok(Action::requeue(ctx.config.sync_period))
}

/// Drop per-cluster state on deletion. The synthetic nodes themselves are
/// removed by the node lifecycle controller that owns deletion.
async fn cleanup_cluster(ctx: &ControllerState, cluster: &Cluster) -> Result<Action> {
    let cluster_name = cluster.name_any();
    ctx.condition_store.remove(&cluster_name);
    ctx.evict_leaf_client(&cluster_name).await;
    info!("Dropped condition and client caches for cluster {cluster_name}");
    Ok(Action::await_change())
}

/// The kubeconfig a Cluster declares for its leaf API server.
fn kubeconfig_for(cluster: &Cluster) -> Result<&str> {
    cluster.spec.kubeconfig.as_deref().ok_or_else(|| {
        Error::ConfigError(format!("cluster {} has no kubeconfig", cluster.name_any()))
    })
}

/// Build a client for the leaf cluster from its kubeconfig YAML.
async fn build_leaf_client(kubeconfig_yaml: &str) -> Result<Client> {
    let kubeconfig: Kubeconfig = serde_yaml::from_str(kubeconfig_yaml)?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await?;
    Client::try_from(config).map_err(Error::KubeError)
}

fn error_policy(cluster: Arc<Cluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    warn!(
        "Reconcile of cluster {} failed: {error}",
        cluster.name_any()
    );
    Action::requeue(Duration::from_secs(15))
}
