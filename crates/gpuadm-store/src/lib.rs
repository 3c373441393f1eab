//! gpuadm-store: Workload store clients
//!
//! This crate provides access to the cluster workload store:
//! - The `WorkloadStore` trait used by the admission pipeline
//! - An HTTP client for a Kubernetes-compatible API server
//! - An in-memory store for tests and dry runs

pub mod http;
pub mod memory;
pub mod traits;

pub use http::HttpWorkloadStore;
pub use memory::InMemoryStore;
pub use traits::WorkloadStore;
