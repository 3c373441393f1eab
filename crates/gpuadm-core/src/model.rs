//! Workload, Node, and NodeView type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Number of core units that make up one whole device
pub const CORES_PER_DEVICE: u32 = 100;

/// A schedulable unit of work that may request the managed device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    /// Workload name
    pub name: String,
    /// Namespace the workload lives in
    pub namespace: String,
    /// Unique identifier assigned by the store
    #[serde(default)]
    pub uid: Uuid,
    /// Metadata annotations
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Lifecycle phase
    #[serde(default)]
    pub phase: WorkloadPhase,
    /// Node the workload is bound to, if any
    #[serde(default)]
    pub node_name: Option<String>,
    /// Per-container device requests, in container order
    #[serde(default)]
    pub containers: Vec<ContainerRequest>,
}

impl Workload {
    /// Create a new pending, unbound workload with no containers
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            annotations: HashMap::new(),
            phase: WorkloadPhase::Pending,
            node_name: None,
            containers: Vec::new(),
        }
    }

    /// Add a container with the given device request
    pub fn with_container(mut self, name: impl Into<String>, cores: u32, memory: u32) -> Self {
        self.containers.push(ContainerRequest {
            name: name.into(),
            device_cores: cores,
            device_memory: memory,
        });
        self
    }

    /// Whether any container asks for the managed device
    pub fn requests_device(&self) -> bool {
        self.containers.iter().any(ContainerRequest::requests_device)
    }

    /// Bound node name; an empty name counts as unbound
    pub fn bound_node(&self) -> Option<&str> {
        self.node_name.as_deref().filter(|n| !n.is_empty())
    }

    /// Reference used to address this workload in the store
    pub fn reference(&self) -> WorkloadRef {
        WorkloadRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            uid: self.uid,
        }
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Device request of a single container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Container name
    pub name: String,
    /// Requested core units (100 = one whole device)
    #[serde(default)]
    pub device_cores: u32,
    /// Requested device memory units
    #[serde(default)]
    pub device_memory: u32,
}

impl ContainerRequest {
    /// Whether this container asks for any device capacity
    pub fn requests_device(&self) -> bool {
        self.device_cores > 0 || self.device_memory > 0
    }

    /// Whether this container asks for one or more whole devices
    pub fn is_whole_device(&self) -> bool {
        self.device_cores >= CORES_PER_DEVICE
    }
}

/// Workload phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    /// Terminal workloads no longer hold device capacity
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadPhase::Pending => write!(f, "Pending"),
            WorkloadPhase::Running => write!(f, "Running"),
            WorkloadPhase::Succeeded => write!(f, "Succeeded"),
            WorkloadPhase::Failed => write!(f, "Failed"),
            WorkloadPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

impl std::str::FromStr for WorkloadPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        })
    }
}

/// Identity of a workload in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.uid)
    }
}

/// A candidate node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    /// Node name
    pub name: String,
    /// Managed device capacity advertised by the node
    #[serde(default)]
    pub capacity: NodeCapacity,
}

impl Node {
    /// Create a node with the given device capacity
    pub fn new(name: impl Into<String>, device_cores: u32, device_memory: u32) -> Self {
        Self {
            name: name.into(),
            capacity: NodeCapacity {
                device_cores,
                device_memory,
            },
        }
    }

    /// Whether the node exposes the managed device at all
    pub fn has_device(&self) -> bool {
        self.capacity.device_cores > 0
    }

    /// Number of physical devices on the node
    pub fn device_count(&self) -> u32 {
        self.capacity.device_cores / CORES_PER_DEVICE
    }

    /// Memory units owned by each device
    pub fn memory_per_device(&self) -> u32 {
        match self.device_count() {
            0 => 0,
            n => self.capacity.device_memory / n,
        }
    }
}

/// Managed device capacity of a node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeCapacity {
    /// Total core units (100 per device)
    pub device_cores: u32,
    /// Total memory units across all devices
    pub device_memory: u32,
}

/// A node together with the workloads currently associated with it
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node: Node,
    pub workloads: Vec<Workload>,
}

impl NodeView {
    pub fn new(node: Node, workloads: Vec<Workload>) -> Self {
        Self { node, workloads }
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}
