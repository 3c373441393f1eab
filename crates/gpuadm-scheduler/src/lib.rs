//! gpuadm-scheduler: Admission pipeline for fractional GPU workloads
//!
//! This crate decides, node by node, whether a node can host a workload:
//! - Node snapshots of bound and provisionally assigned workloads
//! - Device placement through the `Allocator` contract
//! - Idempotent, retrying commit of decision annotations
//! - The `AdmissionFilter` that ties them together

pub mod allocator;
pub mod commit;
pub mod filter;
pub mod snapshot;

pub use allocator::{Allocator, ShareAllocator};
pub use commit::{CommitProtocol, CommitReport};
pub use filter::{AdmissionFilter, FilterStats};
pub use snapshot::NodeSnapshotBuilder;
