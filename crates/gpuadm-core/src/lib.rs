//! gpuadm-core: Core types for the gpuadm admission filter
//!
//! This crate provides the fundamental types used throughout gpuadm:
//! - Workload, node and node view definitions
//! - The decision annotation schema
//! - Configuration types
//! - Error handling and filter outcomes

pub mod annotations;
pub mod config;
pub mod error;
pub mod model;
pub mod outcome;

pub use annotations::*;
pub use config::*;
pub use error::*;
pub use model::*;
pub use outcome::*;
