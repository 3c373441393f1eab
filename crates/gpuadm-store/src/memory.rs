//! In-memory workload store
//!
//! Holds workloads in a map and applies merge patches the same way the API
//! server does. Failures can be scripted so callers can exercise their retry
//! and error paths without a cluster.

use async_trait::async_trait;
use gpuadm_core::{AnnotationDelta, StoreError, StoreResult, Workload};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::traits::WorkloadStore;

type WorkloadsMap = BTreeMap<(String, String), Workload>;

/// Workload store backed by process memory
#[derive(Default)]
pub struct InMemoryStore {
    /// Workloads indexed by (namespace, name)
    workloads: RwLock<WorkloadsMap>,
    /// Errors returned by upcoming list calls, in order
    list_failures: Mutex<VecDeque<StoreError>>,
    /// Errors returned by upcoming patch calls, in order
    patch_failures: Mutex<VecDeque<StoreError>>,
    /// Error returned by every patch once the queue is drained
    sticky_patch_failure: Mutex<Option<StoreError>>,
    list_calls: AtomicUsize,
    patch_attempts: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with workloads
    pub async fn with_workloads(workloads: impl IntoIterator<Item = Workload>) -> Self {
        let store = Self::new();
        for w in workloads {
            store.insert(w).await;
        }
        store
    }

    /// Insert or replace a workload
    pub async fn insert(&self, workload: Workload) {
        let key = (workload.namespace.clone(), workload.name.clone());
        self.workloads.write().await.insert(key, workload);
    }

    /// Get a copy of a stored workload
    pub async fn get(&self, namespace: &str, name: &str) -> Option<Workload> {
        let workloads = self.workloads.read().await;
        workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Fail the next list calls with these errors
    pub async fn fail_lists(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.list_failures.lock().await.extend(errors);
    }

    /// Fail the next patch calls with these errors
    pub async fn fail_patches(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.patch_failures.lock().await.extend(errors);
    }

    /// Fail every patch call with this error
    pub async fn fail_all_patches(&self, error: StoreError) {
        *self.sticky_patch_failure.lock().await = Some(error);
    }

    /// Number of list calls received
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of patch calls received, failed ones included
    pub fn patch_attempts(&self) -> usize {
        self.patch_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadStore for InMemoryStore {
    async fn list_all(&self) -> StoreResult<Vec<Workload>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.list_failures.lock().await.pop_front() {
            return Err(err);
        }

        let workloads = self.workloads.read().await;
        Ok(workloads.values().cloned().collect())
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        delta: &AnnotationDelta,
    ) -> StoreResult<Workload> {
        let attempt = self.patch_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(err) = self.patch_failures.lock().await.pop_front() {
            debug!(attempt = attempt, error = %err, "Injected patch failure");
            return Err(err);
        }
        if let Some(err) = self.sticky_patch_failure.lock().await.clone() {
            return Err(err);
        }

        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("workload {}/{}", namespace, name)))?;

        delta.apply_to(&mut workload.annotations);

        debug!(
            workload = %workload,
            keys = delta.len(),
            "Patched workload annotations"
        );

        Ok(workload.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_all() {
        let store = InMemoryStore::with_workloads(vec![
            Workload::new("default", "a"),
            Workload::new("ml", "b"),
        ])
        .await;

        let listed = store.list_all().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_patch_merges_annotations() {
        let mut w = Workload::new("default", "a");
        w.annotations
            .insert("owner".to_string(), "team-a".to_string());
        let store = InMemoryStore::with_workloads(vec![w]).await;

        let mut delta = AnnotationDelta::new();
        delta.insert("tencent.com/predicate-node", "node-1");

        let patched = store
            .patch_annotations("default", "a", &delta)
            .await
            .unwrap();
        assert_eq!(patched.annotations.len(), 2);
        assert_eq!(patched.annotations["owner"], "team-a");

        let stored = store.get("default", "a").await.unwrap();
        assert_eq!(stored.annotations["tencent.com/predicate-node"], "node-1");
    }

    #[tokio::test]
    async fn test_patch_missing_workload() {
        let store = InMemoryStore::new();
        let err = store
            .patch_annotations("default", "ghost", &AnnotationDelta::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let store = InMemoryStore::with_workloads(vec![Workload::new("default", "a")]).await;
        store
            .fail_patches(vec![StoreError::Conflict("stale".to_string())])
            .await;
        store
            .fail_lists(vec![StoreError::Transport("reset".to_string())])
            .await;

        let delta = AnnotationDelta::new();
        assert!(store.patch_annotations("default", "a", &delta).await.is_err());
        assert!(store.patch_annotations("default", "a", &delta).await.is_ok());
        assert_eq!(store.patch_attempts(), 2);

        assert!(store.list_all().await.is_err());
        assert!(store.list_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_sticky_failure() {
        let store = InMemoryStore::with_workloads(vec![Workload::new("default", "a")]).await;
        store
            .fail_all_patches(StoreError::ServiceUnavailable("down".to_string()))
            .await;

        let delta = AnnotationDelta::new();
        for _ in 0..3 {
            assert!(store.patch_annotations("default", "a", &delta).await.is_err());
        }
        assert_eq!(store.patch_attempts(), 3);
    }
}
