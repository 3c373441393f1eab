//! Commit of decision annotations
//!
//! The delta is written as a single merge patch. Retryable store failures
//! are retried on a fixed interval until a deadline measured from the first
//! attempt; a non-retryable failure aborts at once. Re-applying the same
//! delta is harmless, so a retry after an ambiguous failure is safe.

use gpuadm_core::{AnnotationDelta, CommitConfig, CommitError, StoreError, WorkloadRef};
use gpuadm_store::WorkloadStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Successful commit summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    /// Number of patch attempts, the successful one included
    pub attempts: u32,
    /// Time from the first attempt to success
    pub elapsed: Duration,
}

/// Writes decision annotations with bounded retries
pub struct CommitProtocol {
    store: Arc<dyn WorkloadStore>,
    config: CommitConfig,
}

impl CommitProtocol {
    pub fn new(store: Arc<dyn WorkloadStore>, config: CommitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    /// Merge `delta` into the target workload's annotations
    pub async fn commit(
        &self,
        cancel: &CancellationToken,
        target: &WorkloadRef,
        delta: &AnnotationDelta,
    ) -> Result<CommitReport, CommitError> {
        let interval = self.config.retry_interval();
        let started = Instant::now();
        let deadline = started + self.config.retry_timeout();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CommitError::Cancelled {
                        target: target.to_string(),
                        attempts,
                    });
                }
                r = tokio::time::timeout_at(
                    deadline,
                    self.store.patch_annotations(&target.namespace, &target.name, delta),
                ) => r,
            };

            let last = match result {
                Ok(Ok(_)) => {
                    let elapsed = started.elapsed();
                    info!(
                        workload = %target,
                        attempts = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        annotations = %delta,
                        "Committed decision annotations"
                    );
                    return Ok(CommitReport { attempts, elapsed });
                }
                Ok(Err(err)) if err.is_retryable() => err,
                Ok(Err(err)) => {
                    warn!(
                        workload = %target,
                        attempt = attempts,
                        error = %err,
                        "Commit failed with non-retryable error"
                    );
                    return Err(CommitError::NonRetryable {
                        target: target.to_string(),
                        source: err,
                        attempts,
                    });
                }
                Err(_) => StoreError::Timeout(format!(
                    "patch did not complete within {:?}",
                    self.config.retry_timeout()
                )),
            };

            debug!(
                workload = %target,
                attempt = attempts,
                error = %last,
                "Retryable commit failure"
            );

            let next = (Instant::now() + interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(CommitError::Cancelled {
                        target: target.to_string(),
                        attempts,
                    });
                }
                _ = tokio::time::sleep_until(next) => {}
            }

            if Instant::now() >= deadline {
                let elapsed = started.elapsed();
                warn!(
                    workload = %target,
                    attempts = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %last,
                    "Commit retries exhausted"
                );
                return Err(CommitError::RetryExhausted {
                    target: target.to_string(),
                    last,
                    attempts,
                    elapsed,
                });
            }
        }
    }
}
