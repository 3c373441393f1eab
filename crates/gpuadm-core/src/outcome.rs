//! Filter outcomes returned to the scheduler

use crate::{AdmissionError, AnnotationDelta};
use serde::{Deserialize, Serialize};

/// Result of evaluating one node for one workload
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The node is accepted
    Success(Admitted),
    /// The node is not a candidate; not a fault
    Skip(SkipReason),
    /// Evaluating the node failed
    Error(AdmissionError),
}

/// Why a node was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    /// The workload does not request the managed device
    NotApplicable,
    /// A decision was committed with these annotations
    Committed(AnnotationDelta),
}

/// Why a node was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The workload already carries a decision
    AlreadyDecided,
    /// The node does not expose the managed device
    NodeIneligible,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyDecided => write!(f, "already decided"),
            SkipReason::NodeIneligible => write!(f, "node has no managed device"),
        }
    }
}

/// Three-state code of a filter outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCode {
    Success,
    Skip,
    Error,
}

impl std::fmt::Display for FilterCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterCode::Success => write!(f, "Success"),
            FilterCode::Skip => write!(f, "Skip"),
            FilterCode::Error => write!(f, "Error"),
        }
    }
}

impl FilterOutcome {
    pub fn code(&self) -> FilterCode {
        match self {
            FilterOutcome::Success(_) => FilterCode::Success,
            FilterOutcome::Skip(_) => FilterCode::Skip,
            FilterOutcome::Error(_) => FilterCode::Error,
        }
    }

    /// Human-readable message attached to the outcome
    pub fn message(&self) -> String {
        match self {
            FilterOutcome::Success(Admitted::NotApplicable) => {
                "workload does not request managed devices".to_string()
            }
            FilterOutcome::Success(Admitted::Committed(_)) => String::new(),
            FilterOutcome::Skip(reason) => reason.to_string(),
            FilterOutcome::Error(err) => err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FilterOutcome::Success(_))
    }

    /// Annotations committed by this evaluation, if any
    pub fn committed(&self) -> Option<&AnnotationDelta> {
        match self {
            FilterOutcome::Success(Admitted::Committed(delta)) => Some(delta),
            _ => None,
        }
    }
}
