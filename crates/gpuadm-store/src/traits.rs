//! Workload store trait definitions

use async_trait::async_trait;
use gpuadm_core::{AnnotationDelta, StoreResult, Workload};

/// Access to the cluster-wide workload store
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// List every workload in every namespace
    async fn list_all(&self) -> StoreResult<Vec<Workload>>;

    /// Merge `delta` into the workload's annotations as one write
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        delta: &AnnotationDelta,
    ) -> StoreResult<Workload>;

    /// Get the store name
    fn name(&self) -> &'static str;
}
