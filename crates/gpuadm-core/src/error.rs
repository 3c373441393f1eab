//! Error types for gpuadm

use std::time::Duration;
use thiserror::Error;

/// Error type for process-level failures (configuration, IO, startup)
#[derive(Error, Debug)]
pub enum GpuadmError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for process-level operations
pub type GpuadmResult<T> = Result<T, GpuadmError>;

impl From<serde_json::Error> for GpuadmError {
    fn from(err: serde_json::Error) -> Self {
        GpuadmError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuadmError {
    fn from(err: toml::de::Error) -> Self {
        GpuadmError::Config(err.to_string())
    }
}

/// Failure reported by the workload store client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Write conflict with a concurrent update
    #[error("conflict: {0}")]
    Conflict(String),

    /// Server asked the client to back off
    #[error("too many requests: {0}")]
    TooManyRequests(String),

    /// Request or server-side timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transient server-side failure
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Network-level failure talking to the store
    #[error("transport error: {0}")]
    Transport(String),

    /// Workload does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Request was rejected as malformed
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Credentials missing or insufficient
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Any other failure
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether the failure is transient and the request may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::TooManyRequests(_)
                | StoreError::Timeout(_)
                | StoreError::ServiceUnavailable(_)
                | StoreError::Transport(_)
        )
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of the placement decision
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Node cannot host the workload
    #[error("insufficient device capacity: {0}")]
    Infeasible(String),

    /// Workload request cannot be satisfied on any node
    #[error("invalid device request: {0}")]
    InvalidRequest(String),

    /// The allocator reported success without writing a decision
    #[error("allocator returned no decision annotations for {0}")]
    NoDecision(String),
}

/// Failure of the commit protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// The store rejected the patch with a non-retryable error
    #[error("failed to add annotations to {target}: {source}")]
    NonRetryable {
        target: String,
        source: StoreError,
        attempts: u32,
    },

    /// Only retryable failures occurred until the deadline passed
    #[error("failed to add annotations to {target} after {attempts} attempts in {elapsed:?}: {last}")]
    RetryExhausted {
        target: String,
        last: StoreError,
        attempts: u32,
        elapsed: Duration,
    },

    /// The caller cancelled the commit
    #[error("commit to {target} cancelled after {attempts} attempts")]
    Cancelled { target: String, attempts: u32 },
}

/// Failure while evaluating a node for a workload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Listing workloads failed
    #[error("failed to list workloads: {0}")]
    List(StoreError),

    /// The allocator could not place the workload
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Persisting the decision failed
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// The caller's cancellation signal fired
    #[error("admission cancelled")]
    Cancelled,
}

/// Result type for admission operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;
