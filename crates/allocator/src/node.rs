// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Node inventory records and allocation receipts.

use chrono::{DateTime, Utc};
use rocforge_model::GpuArchitecture;
use uuid::Uuid;

/// What an inventory source reports for one node. Totals only: the
/// allocator derives availability by subtracting its own outstanding
/// reservations.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    /// Node name, unique within the fleet.
    pub node_name: String,
    /// All GPU device ids on the node.
    pub gpu_ids: Vec<String>,
    /// Architecture per GPU slot, parallel to `gpu_ids`.
    pub gpu_architectures: Vec<GpuArchitecture>,
    /// Total CPU cores.
    pub total_cpu_cores: u32,
    /// Total memory in GB.
    pub total_memory_gb: f64,
    /// Whether the source considers the node schedulable.
    pub healthy: bool,
}

/// Reconciled view of one node: totals from the latest report, availability
/// net of outstanding reservations.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResources {
    /// Node name.
    pub node_name: String,
    /// Total GPU count.
    pub total_gpus: u32,
    /// GPUs not currently reserved.
    pub available_gpus: u32,
    /// Device ids of the unreserved GPUs, in report order.
    pub available_gpu_ids: Vec<String>,
    /// Architecture per GPU slot on the node.
    pub gpu_architectures: Vec<GpuArchitecture>,
    /// Total CPU cores.
    pub total_cpu_cores: u32,
    /// CPU cores not currently reserved.
    pub available_cpu_cores: u32,
    /// Total memory in GB.
    pub total_memory_gb: f64,
    /// Memory not currently reserved, in GB.
    pub available_memory_gb: f64,
    /// False once the node vanishes from the source or reports unready.
    pub healthy: bool,
    /// When the node was last seen in a report.
    pub last_updated: DateTime<Utc>,
}

/// A reservation of GPU/CPU/memory slots on one node for one dispatch.
/// Owned exclusively by the coordinator and released exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAllocation {
    /// Unique allocation id.
    pub allocation_id: Uuid,
    /// Node the reservation lives on.
    pub node_name: String,
    /// Reserved GPU device ids.
    pub gpu_ids: Vec<String>,
    /// Reserved CPU cores.
    pub cpu_cores: u32,
    /// Reserved memory in GB.
    pub memory_gb: f64,
    /// When the reservation was made.
    pub allocated_at: DateTime<Utc>,
}

/// Fleet-wide availability over healthy nodes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSummary {
    /// Unreserved GPUs across healthy nodes.
    pub gpus: u32,
    /// Unreserved CPU cores across healthy nodes.
    pub cpu_cores: u32,
    /// Unreserved memory across healthy nodes, in GB.
    pub memory_gb: f64,
    /// Nodes currently healthy.
    pub healthy_nodes: usize,
    /// All nodes ever seen.
    pub total_nodes: usize,
}
