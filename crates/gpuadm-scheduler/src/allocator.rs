//! Device placement
//!
//! The `Allocator` contract turns a workload and a node view into the same
//! workload annotated with a device assignment. `ShareAllocator` is the
//! default placement: whole-device requests take the lowest free devices,
//! fractional requests are packed onto the best-fitting device.

use chrono::{DateTime, Utc};
use gpuadm_core::{
    AllocationError, AnnotationKeys, ContainerRequest, NodeView, Workload, ASSIGNED_VALUE,
    CORES_PER_DEVICE,
};
use tracing::{debug, warn};

/// Placement decision for a workload on a node
///
/// Implementations must be deterministic: the same workload and view must
/// always yield the same device assignment.
pub trait Allocator: Send + Sync {
    /// Return the workload annotated with a feasible assignment
    fn allocate(&self, workload: &Workload, view: &NodeView) -> Result<Workload, AllocationError>;
}

/// Default placement over fractional device capacity
pub struct ShareAllocator {
    keys: AnnotationKeys,
    clock: fn() -> DateTime<Utc>,
}

impl ShareAllocator {
    /// Create an allocator that stamps decisions with the wall clock
    pub fn new(keys: AnnotationKeys) -> Self {
        Self {
            keys,
            clock: Utc::now,
        }
    }

    /// Use a fixed clock for decision timestamps
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }
}

impl Allocator for ShareAllocator {
    fn allocate(&self, workload: &Workload, view: &NodeView) -> Result<Workload, AllocationError> {
        let node = &view.node;
        if node.device_count() == 0 {
            return Err(AllocationError::Infeasible(format!(
                "node {} exposes no whole device",
                node.name
            )));
        }

        let mut table = DeviceTable::from_view(view, &self.keys);
        let mut assignments: Vec<(usize, Vec<u32>)> = Vec::new();

        for (i, container) in workload.containers.iter().enumerate() {
            if !container.requests_device() {
                continue;
            }
            let indices = if container.is_whole_device() {
                table.take_whole(container)?
            } else {
                table.take_shared(container)?
            };
            assignments.push((i, indices));
        }

        if assignments.is_empty() {
            return Err(AllocationError::InvalidRequest(format!(
                "workload {} requests no device capacity",
                workload
            )));
        }

        let mut annotated = workload.clone();
        for (i, indices) in &assignments {
            let value = indices
                .iter()
                .map(|idx| idx.to_string())
                .collect::<Vec<_>>()
                .join(",");
            annotated.annotations.insert(self.keys.gpu_index(*i), value);
        }
        annotated
            .annotations
            .insert(self.keys.assigned().to_string(), ASSIGNED_VALUE.to_string());
        annotated.annotations.insert(
            self.keys.predicate_time().to_string(),
            (self.clock)().to_rfc3339(),
        );
        annotated
            .annotations
            .insert(self.keys.predicate_node().to_string(), node.name.clone());

        debug!(
            workload = %workload,
            node = %node.name,
            assignments = ?assignments,
            "Allocated devices"
        );

        Ok(annotated)
    }
}

/// Free capacity of a single device
#[derive(Debug, Clone, Copy)]
struct DeviceState {
    index: u32,
    free_cores: u32,
    free_memory: u32,
}

/// Free capacity of every device on a node
struct DeviceTable {
    node: String,
    devices: Vec<DeviceState>,
    memory_per_device: u32,
}

impl DeviceTable {
    /// Reconstruct usage from the device index annotations in the view
    fn from_view(view: &NodeView, keys: &AnnotationKeys) -> Self {
        let memory_per_device = view.node.memory_per_device();
        let devices = (0..view.node.device_count())
            .map(|index| DeviceState {
                index,
                free_cores: CORES_PER_DEVICE,
                free_memory: memory_per_device,
            })
            .collect();

        let mut table = Self {
            node: view.node.name.clone(),
            devices,
            memory_per_device,
        };

        for workload in &view.workloads {
            for (i, container) in workload.containers.iter().enumerate() {
                if !container.requests_device() {
                    continue;
                }
                let Some(value) = workload.annotations.get(&keys.gpu_index(i)) else {
                    continue;
                };
                let indices = match parse_indices(value) {
                    Some(indices) => indices,
                    None => {
                        warn!(
                            workload = %workload,
                            container = i,
                            value = %value,
                            "Ignoring malformed device index annotation"
                        );
                        continue;
                    }
                };
                for idx in indices {
                    if container.is_whole_device() {
                        table.claim(idx, CORES_PER_DEVICE, memory_per_device);
                    } else {
                        table.claim(idx, container.device_cores, container.device_memory);
                    }
                }
            }
        }

        table
    }

    fn claim(&mut self, index: u32, cores: u32, memory: u32) {
        match self.devices.get_mut(index as usize) {
            Some(device) => {
                device.free_cores = device.free_cores.saturating_sub(cores);
                device.free_memory = device.free_memory.saturating_sub(memory);
            }
            None => warn!(node = %self.node, device = index, "Device index out of range"),
        }
    }

    /// Take whole, completely idle devices, lowest index first
    fn take_whole(&mut self, container: &ContainerRequest) -> Result<Vec<u32>, AllocationError> {
        if container.device_cores % CORES_PER_DEVICE != 0 {
            return Err(AllocationError::InvalidRequest(format!(
                "container {} requests {} cores; requests above one device must be a multiple of {}",
                container.name, container.device_cores, CORES_PER_DEVICE
            )));
        }

        let needed = (container.device_cores / CORES_PER_DEVICE) as usize;
        let idle: Vec<u32> = self
            .devices
            .iter()
            .filter(|d| d.free_cores == CORES_PER_DEVICE && d.free_memory == self.memory_per_device)
            .map(|d| d.index)
            .collect();

        if idle.len() < needed {
            return Err(AllocationError::Infeasible(format!(
                "node {}: container {} needs {} idle devices, {} available",
                self.node,
                container.name,
                needed,
                idle.len()
            )));
        }

        let taken: Vec<u32> = idle.into_iter().take(needed).collect();
        for idx in &taken {
            self.claim(*idx, CORES_PER_DEVICE, self.memory_per_device);
        }
        Ok(taken)
    }

    /// Best fit: the device with the least free capacity that still fits
    fn take_shared(&mut self, container: &ContainerRequest) -> Result<Vec<u32>, AllocationError> {
        let best = self
            .devices
            .iter()
            .filter(|d| {
                d.free_cores >= container.device_cores && d.free_memory >= container.device_memory
            })
            .min_by_key(|d| (d.free_cores, d.free_memory, d.index))
            .map(|d| d.index);

        match best {
            Some(idx) => {
                self.claim(idx, container.device_cores, container.device_memory);
                Ok(vec![idx])
            }
            None => Err(AllocationError::Infeasible(format!(
                "node {}: no device has {} free cores and {} free memory for container {}",
                self.node, container.device_cores, container.device_memory, container.name
            ))),
        }
    }
}

fn parse_indices(value: &str) -> Option<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}
