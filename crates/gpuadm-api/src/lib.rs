//! gpuadm-api: Scheduler extender API for gpuadm
//!
//! This crate exposes the admission filter over HTTP:
//! - Extender-style filtering of a workload against candidate nodes
//! - Single node evaluation
//! - Health and status

pub mod rest;

pub use rest::create_router;
