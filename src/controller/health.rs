//! Leaf API server health probing

use kube::Client;
use tracing::warn;

/// Probe the leaf API server's readiness endpoint.
///
/// Returns true iff the request succeeds with HTTP 200. Any transport
/// failure or non-200 response counts as offline; timeouts are the
/// caller's concern.
pub async fn is_online(leaf_client: &Client, cluster_name: &str) -> bool {
    let request = match http::Request::get("/readyz").body(Vec::new()) {
        Ok(request) => request,
        Err(err) => {
            warn!("Failed to build readiness request: {err}");
            return false;
        }
    };

    match leaf_client.request_text(request).await {
        Ok(_) => true,
        Err(err) => {
            warn!("Leaf cluster {cluster_name} isn't healthy: {err}");
            false
        }
    }
}
