//! Node snapshots
//!
//! A node's view is rebuilt from a full listing on every decision. Workloads
//! that are bound to the node count, and so do unbound workloads whose
//! provisional node annotation names it; terminal workloads do not.

use gpuadm_core::{AdmissionError, AdmissionResult, AnnotationKeys, Node, NodeView, Workload};
use gpuadm_store::WorkloadStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Builds a fresh `NodeView` from the workload store
pub struct NodeSnapshotBuilder {
    store: Arc<dyn WorkloadStore>,
    keys: AnnotationKeys,
}

impl NodeSnapshotBuilder {
    pub fn new(store: Arc<dyn WorkloadStore>, keys: AnnotationKeys) -> Self {
        Self { store, keys }
    }

    /// List every workload and keep those associated with `node`
    pub async fn build_view(
        &self,
        cancel: &CancellationToken,
        node: &Node,
    ) -> AdmissionResult<NodeView> {
        let all = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
            listed = self.store.list_all() => listed.map_err(AdmissionError::List)?,
        };

        let total = all.len();
        let workloads: Vec<Workload> = all
            .into_iter()
            .filter(|w| {
                trace!(workload = %w, "Considering workload");
                is_associated(w, &node.name, &self.keys)
            })
            .collect();

        debug!(
            node = %node.name,
            total = total,
            associated = workloads.len(),
            "Built node view"
        );

        Ok(NodeView::new(node.clone(), workloads))
    }
}

/// Whether `workload` currently holds capacity on `node_name`
pub fn is_associated(workload: &Workload, node_name: &str, keys: &AnnotationKeys) -> bool {
    if workload.phase.is_terminal() {
        return false;
    }

    match workload.bound_node() {
        Some(bound) => bound == node_name,
        None => keys.provisional_node(&workload.annotations) == Some(node_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuadm_core::{StoreError, WorkloadPhase};
    use gpuadm_store::InMemoryStore;

    fn bound(name: &str, node: &str, phase: WorkloadPhase) -> Workload {
        let mut w = Workload::new("default", name);
        w.node_name = Some(node.to_string());
        w.phase = phase;
        w
    }

    fn provisional(name: &str, node: &str) -> Workload {
        let keys = AnnotationKeys::default();
        let mut w = Workload::new("default", name);
        w.annotations
            .insert(keys.predicate_node().to_string(), node.to_string());
        w
    }

    #[test]
    fn test_is_associated() {
        let keys = AnnotationKeys::default();

        assert!(is_associated(
            &bound("a", "node-1", WorkloadPhase::Running),
            "node-1",
            &keys
        ));
        assert!(!is_associated(
            &bound("a", "node-2", WorkloadPhase::Running),
            "node-1",
            &keys
        ));
        assert!(is_associated(&provisional("b", "node-1"), "node-1", &keys));
        assert!(!is_associated(&provisional("b", "node-2"), "node-1", &keys));
        assert!(!is_associated(
            &bound("c", "node-1", WorkloadPhase::Failed),
            "node-1",
            &keys
        ));
        assert!(!is_associated(&Workload::new("default", "d"), "node-1", &keys));
    }

    #[test]
    fn test_binding_wins_over_provisional_annotation() {
        let keys = AnnotationKeys::default();
        let mut w = provisional("b", "node-1");
        w.node_name = Some("node-2".to_string());

        assert!(!is_associated(&w, "node-1", &keys));
        assert!(is_associated(&w, "node-2", &keys));
    }

    #[test]
    fn test_empty_bound_node_uses_provisional_annotation() {
        let keys = AnnotationKeys::default();
        let mut w = provisional("b", "node-1");
        w.node_name = Some(String::new());

        assert!(is_associated(&w, "node-1", &keys));
    }

    #[tokio::test]
    async fn test_build_view_bound_and_provisional() {
        let mut provisional_pending = provisional("b", "node-1");
        provisional_pending.phase = WorkloadPhase::Pending;

        let store = Arc::new(
            InMemoryStore::with_workloads(vec![
                bound("a", "node-1", WorkloadPhase::Running),
                provisional_pending,
                bound("c", "node-1", WorkloadPhase::Succeeded),
                bound("d", "node-2", WorkloadPhase::Running),
            ])
            .await,
        );
        let builder = NodeSnapshotBuilder::new(store, AnnotationKeys::default());

        let node = Node::new("node-1", 200, 32);
        let view = builder
            .build_view(&CancellationToken::new(), &node)
            .await
            .unwrap();

        let mut names: Vec<&str> = view.workloads.iter().map(|w| w.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(view.node, node);
    }

    #[tokio::test]
    async fn test_build_view_list_failure() {
        let store = Arc::new(InMemoryStore::new());
        store
            .fail_lists(vec![StoreError::Transport("connection reset".to_string())])
            .await;
        let builder = NodeSnapshotBuilder::new(store, AnnotationKeys::default());

        let err = builder
            .build_view(&CancellationToken::new(), &Node::new("node-1", 100, 16))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::List(StoreError::Transport(_))));
    }

    #[tokio::test]
    async fn test_build_view_cancelled() {
        let store = Arc::new(InMemoryStore::new());
        let builder = NodeSnapshotBuilder::new(store, AnnotationKeys::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = builder
            .build_view(&cancel, &Node::new("node-1", 100, 16))
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::Cancelled);
    }
}
