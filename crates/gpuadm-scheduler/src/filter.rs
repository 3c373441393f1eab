//! Admission filter
//!
//! Entry point called by the scheduler once per (workload, node) pair. The
//! filter holds no per-decision state: every call reads a fresh node view,
//! asks the allocator for a placement and commits the decision annotations
//! before the scheduler binds the workload.

use gpuadm_core::{
    AdmissionConfig, AdmissionError, AdmissionResult, Admitted, AllocationError, AnnotationDelta,
    AnnotationKeys, CommitConfig, FilterOutcome, Node, SkipReason, Workload,
};
use gpuadm_store::WorkloadStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allocator::Allocator;
use crate::commit::CommitProtocol;
use crate::snapshot::NodeSnapshotBuilder;

/// Counters of filter outcomes
#[derive(Debug, Default)]
pub struct FilterStats {
    success: AtomicU64,
    skip: AtomicU64,
    error: AtomicU64,
}

/// Point-in-time copy of `FilterStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub success: u64,
    pub skip: u64,
    pub error: u64,
}

impl FilterStats {
    fn record(&self, outcome: &FilterOutcome) {
        let counter = match outcome {
            FilterOutcome::Success(_) => &self.success,
            FilterOutcome::Skip(_) => &self.skip,
            FilterOutcome::Error(_) => &self.error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> FilterCounts {
        FilterCounts {
            success: self.success.load(Ordering::Relaxed),
            skip: self.skip.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
        }
    }
}

/// Decides whether a node can host a workload and records the decision
pub struct AdmissionFilter {
    snapshot: NodeSnapshotBuilder,
    allocator: Arc<dyn Allocator>,
    committer: CommitProtocol,
    keys: AnnotationKeys,
    stats: FilterStats,
}

impl AdmissionFilter {
    /// Create a new admission filter
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        allocator: Arc<dyn Allocator>,
        keys: AnnotationKeys,
        commit: CommitConfig,
    ) -> Self {
        Self {
            snapshot: NodeSnapshotBuilder::new(store.clone(), keys.clone()),
            allocator,
            committer: CommitProtocol::new(store, commit),
            keys,
            stats: FilterStats::default(),
        }
    }

    /// Create a filter from daemon configuration
    pub fn from_config(
        store: Arc<dyn WorkloadStore>,
        allocator: Arc<dyn Allocator>,
        config: &AdmissionConfig,
    ) -> Self {
        Self::new(
            store,
            allocator,
            config.admission.annotation_keys(),
            config.commit.clone(),
        )
    }

    pub fn keys(&self) -> &AnnotationKeys {
        &self.keys
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Evaluate `node` for `workload`
    pub async fn filter(
        &self,
        cancel: &CancellationToken,
        workload: &Workload,
        node: &Node,
    ) -> FilterOutcome {
        debug!(workload = %workload, node = %node.name, "Filtering node");

        let outcome = self.evaluate(cancel, workload, node).await;
        self.stats.record(&outcome);

        match &outcome {
            FilterOutcome::Success(Admitted::NotApplicable) => {
                debug!(workload = %workload, "Workload does not request managed devices");
            }
            FilterOutcome::Success(Admitted::Committed(_)) => {
                info!(workload = %workload, node = %node.name, "Node admitted");
            }
            FilterOutcome::Skip(reason) => {
                debug!(
                    workload = %workload,
                    node = %node.name,
                    reason = %reason,
                    "Node skipped"
                );
            }
            FilterOutcome::Error(err) => {
                warn!(
                    workload = %workload,
                    node = %node.name,
                    error = %err,
                    "Node rejected"
                );
            }
        }

        outcome
    }

    async fn evaluate(
        &self,
        cancel: &CancellationToken,
        workload: &Workload,
        node: &Node,
    ) -> FilterOutcome {
        if !workload.requests_device() {
            return FilterOutcome::Success(Admitted::NotApplicable);
        }

        if self.keys.has_decision(&workload.annotations) {
            return FilterOutcome::Skip(SkipReason::AlreadyDecided);
        }

        if !node.has_device() {
            return FilterOutcome::Skip(SkipReason::NodeIneligible);
        }

        match self.decide(cancel, workload, node).await {
            Ok(delta) => FilterOutcome::Success(Admitted::Committed(delta)),
            Err(err) => FilterOutcome::Error(err),
        }
    }

    async fn decide(
        &self,
        cancel: &CancellationToken,
        workload: &Workload,
        node: &Node,
    ) -> AdmissionResult<AnnotationDelta> {
        let view = self.snapshot.build_view(cancel, node).await?;

        let annotated = self.allocator.allocate(workload, &view)?;

        let delta = self.keys.extract_decision(&annotated.annotations);
        if delta.is_empty() {
            return Err(AllocationError::NoDecision(workload.to_string()).into());
        }
        if delta.get(self.keys.predicate_node()) != Some(node.name.as_str()) {
            warn!(
                workload = %workload,
                node = %node.name,
                recorded = ?delta.get(self.keys.predicate_node()),
                "Allocator recorded a different provisional node"
            );
        }

        if cancel.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }

        self.committer
            .commit(cancel, &workload.reference(), &delta)
            .await?;

        Ok(delta)
    }
}
