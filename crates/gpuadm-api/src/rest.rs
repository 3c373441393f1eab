//! REST API handlers

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use gpuadm_core::{FilterCode, FilterOutcome, Node, Workload};
use gpuadm_scheduler::AdmissionFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub filter: Arc<AdmissionFilter>,
    /// Cancelled when the daemon shuts down
    pub shutdown: CancellationToken,
}

/// Create the API router
pub fn create_router(filter: Arc<AdmissionFilter>, shutdown: CancellationToken) -> Router {
    let state = Arc::new(AppState { filter, shutdown });

    Router::new()
        .route("/filter", post(filter_nodes))
        .route("/filter/node", post(filter_node))
        .route("/healthz", get(healthz))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Extender filter request
#[derive(Debug, Deserialize)]
pub struct ExtenderArgs {
    /// Workload being scheduled
    pub workload: Workload,
    /// Candidate nodes, in the order they should be tried
    pub nodes: Vec<Node>,
}

/// Outcome for a single node
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: String,
    pub code: FilterCode,
    pub message: String,
}

impl NodeResult {
    fn new(node: &Node, outcome: &FilterOutcome) -> Self {
        Self {
            node: node.name.clone(),
            code: outcome.code(),
            message: outcome.message(),
        }
    }
}

/// Extender filter response
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExtenderFilterResult {
    /// Nodes that passed the filter
    pub node_names: Vec<String>,
    /// Nodes that did not pass, with the reason
    pub failed_nodes: BTreeMap<String, String>,
    /// Per-node outcomes, in request order
    pub results: Vec<NodeResult>,
    /// Set when the request could not be evaluated at all
    pub error: String,
}

/// Filter a workload against candidate nodes
///
/// Nodes are evaluated in order. Once a decision is committed the local
/// copy of the workload carries it, so the remaining nodes are skipped as
/// already decided and the workload ends up pinned to a single node.
async fn filter_nodes(
    State(state): State<Arc<AppState>>,
    Json(args): Json<ExtenderArgs>,
) -> Json<ExtenderFilterResult> {
    info!(
        workload = %args.workload,
        nodes = args.nodes.len(),
        "Filter request"
    );

    let cancel = state.shutdown.child_token();
    let mut workload = args.workload;
    let mut result = ExtenderFilterResult::default();

    for node in &args.nodes {
        let outcome = state.filter.filter(&cancel, &workload, node).await;

        if let Some(delta) = outcome.committed() {
            delta.apply_to(&mut workload.annotations);
        }

        if outcome.is_success() {
            result.node_names.push(node.name.clone());
        } else {
            result
                .failed_nodes
                .insert(node.name.clone(), outcome.message());
        }
        result.results.push(NodeResult::new(node, &outcome));
    }

    if cancel.is_cancelled() {
        result.error = "admission cancelled".to_string();
    }

    Json(result)
}

/// Single node filter request
#[derive(Debug, Deserialize)]
pub struct NodeFilterArgs {
    pub workload: Workload,
    pub node: Node,
}

/// Evaluate one node for a workload
async fn filter_node(
    State(state): State<Arc<AppState>>,
    Json(args): Json<NodeFilterArgs>,
) -> Json<NodeResult> {
    let cancel = state.shutdown.child_token();
    let outcome = state.filter.filter(&cancel, &args.workload, &args.node).await;
    Json(NodeResult::new(&args.node, &outcome))
}

async fn healthz() -> &'static str {
    "ok"
}

/// System status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub annotation_prefix: String,
    pub success: u64,
    pub skip: u64,
    pub error: u64,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let counts = state.filter.stats().counts();
    let assigned = state.filter.keys().assigned();
    let prefix = assigned
        .rsplit_once('/')
        .map(|(domain, _)| domain)
        .unwrap_or(assigned);

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        annotation_prefix: prefix.to_string(),
        success: counts.success,
        skip: counts.skip,
        error: counts.error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gpuadm_core::{AnnotationKeys, CommitConfig};
    use gpuadm_scheduler::ShareAllocator;
    use gpuadm_store::InMemoryStore;
    use tower::ServiceExt;

    async fn setup(workloads: Vec<Workload>) -> (Arc<InMemoryStore>, Router) {
        let store = Arc::new(InMemoryStore::with_workloads(workloads).await);
        let filter = Arc::new(AdmissionFilter::new(
            store.clone(),
            Arc::new(ShareAllocator::new(AnnotationKeys::default())),
            AnnotationKeys::default(),
            CommitConfig::default(),
        ));
        (store, create_router(filter, CancellationToken::new()))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        router: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> T {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_, router) = setup(vec![]).await;
        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_filter_pins_single_node() {
        let workload = Workload::new("default", "job").with_container("main", 50, 4);
        let (store, router) = setup(vec![workload.clone()]).await;

        let body = serde_json::json!({
            "workload": workload,
            "nodes": [
                Node::new("cpu-1", 0, 0),
                Node::new("gpu-1", 100, 16),
                Node::new("gpu-2", 100, 16),
            ],
        });
        let result: ExtenderFilterResult = post_json(router, "/filter", body).await;

        assert_eq!(result.node_names, vec!["gpu-1".to_string()]);
        assert_eq!(result.failed_nodes["cpu-1"], "node has no managed device");
        assert_eq!(result.failed_nodes["gpu-2"], "already decided");
        assert_eq!(result.results[1].code, FilterCode::Success);
        assert_eq!(result.results[2].code, FilterCode::Skip);
        assert!(result.error.is_empty());

        let stored = store.get("default", "job").await.unwrap();
        assert_eq!(stored.annotations["tencent.com/predicate-node"], "gpu-1");
    }

    #[tokio::test]
    async fn test_filter_non_gpu_workload_passes_all() {
        let workload = Workload::new("default", "web");
        let (store, router) = setup(vec![workload.clone()]).await;

        let body = serde_json::json!({
            "workload": workload,
            "nodes": [Node::new("cpu-1", 0, 0), Node::new("gpu-1", 100, 16)],
        });
        let result: ExtenderFilterResult = post_json(router, "/filter", body).await;

        assert_eq!(result.node_names.len(), 2);
        assert!(result.failed_nodes.is_empty());
        assert_eq!(store.patch_attempts(), 0);
    }

    #[tokio::test]
    async fn test_filter_single_node_error() {
        let workload = Workload::new("default", "big").with_container("main", 300, 0);
        let (_, router) = setup(vec![workload.clone()]).await;

        let body = serde_json::json!({
            "workload": workload,
            "node": Node::new("gpu-1", 200, 32),
        });
        let result: NodeResult = post_json(router, "/filter/node", body).await;

        assert_eq!(result.node, "gpu-1");
        assert_eq!(result.code, FilterCode::Error);
        assert!(result.message.contains("idle devices"));
    }

    #[tokio::test]
    async fn test_status_counts() {
        let workload = Workload::new("default", "web");
        let (_, router) = setup(vec![]).await;

        let body = serde_json::json!({
            "workload": workload,
            "node": Node::new("gpu-1", 100, 16),
        });
        let _: NodeResult = post_json(router.clone(), "/filter/node", body).await;

        let response = router
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: StatusResponse = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(status.success, 1);
        assert_eq!(status.annotation_prefix, "tencent.com");
    }
}
