// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Allocator state and the reserve/release operations.

use crate::error::Error;
use crate::node::{NodeReport, NodeResources, ResourceAllocation, ResourceSummary};
use crate::source::InventorySource;
use chrono::Utc;
use rocforge_config::AllocatorSettings;
use rocforge_model::BuildConfiguration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct AllocatorInner {
    nodes: HashMap<String, NodeResources>,
    allocations: HashMap<Uuid, ResourceAllocation>,
}

impl AllocatorInner {
    /// Folds a fresh report set into the node map. Availability is always
    /// recomputed as `reported_total − Σ outstanding`, so reservations
    /// survive refreshes. Nodes missing from the reports are marked
    /// unhealthy but keep their allocations until released.
    fn reconcile(&mut self, reports: Vec<NodeReport>) {
        let now = Utc::now();

        for node in self.nodes.values_mut() {
            if !reports.iter().any(|r| r.node_name == node.node_name) {
                if node.healthy {
                    warn!(node = %node.node_name, "node vanished from inventory source");
                }
                node.healthy = false;
            }
        }

        for report in reports {
            let mut reserved_gpu_ids: Vec<&str> = Vec::new();
            let mut reserved_cpu: u32 = 0;
            let mut reserved_memory: f64 = 0.0;
            for allocation in self.allocations.values() {
                if allocation.node_name == report.node_name {
                    reserved_gpu_ids.extend(allocation.gpu_ids.iter().map(String::as_str));
                    reserved_cpu += allocation.cpu_cores;
                    reserved_memory += allocation.memory_gb;
                }
            }

            let available_gpu_ids: Vec<String> = report
                .gpu_ids
                .iter()
                .filter(|id| !reserved_gpu_ids.contains(&id.as_str()))
                .cloned()
                .collect();
            let total_gpus = u32::try_from(report.gpu_ids.len()).unwrap_or(u32::MAX);
            let available_gpus = u32::try_from(available_gpu_ids.len()).unwrap_or(u32::MAX);

            let entry = NodeResources {
                node_name: report.node_name.clone(),
                total_gpus,
                available_gpus,
                available_gpu_ids,
                gpu_architectures: report.gpu_architectures,
                total_cpu_cores: report.total_cpu_cores,
                available_cpu_cores: report.total_cpu_cores.saturating_sub(reserved_cpu),
                total_memory_gb: report.total_memory_gb,
                available_memory_gb: (report.total_memory_gb - reserved_memory).max(0.0),
                healthy: report.healthy,
                last_updated: now,
            };
            let _previous = self.nodes.insert(report.node_name, entry);
        }
    }
}

/// Maintains per-node inventories and hands out atomic reservations.
///
/// All reads and mutations go through one allocator-wide lock, so a
/// refresh can never interleave with an allocation and double-count.
pub struct ResourceAllocator {
    source: Arc<dyn InventorySource>,
    settings: AllocatorSettings,
    inner: Mutex<AllocatorInner>,
}

impl ResourceAllocator {
    /// Creates an allocator over `source` with the configured defaults.
    #[must_use]
    pub fn new(source: Arc<dyn InventorySource>, settings: AllocatorSettings) -> Self {
        Self {
            source,
            settings,
            inner: Mutex::new(AllocatorInner::default()),
        }
    }

    /// Pulls current inventory from the source and reconciles it against
    /// outstanding reservations. A source failure keeps the previous
    /// (stale) inventory.
    pub async fn refresh(&self) -> Result<(), Error> {
        let reports = self.source.fetch().await?;
        let mut inner = self.inner.lock().await;
        inner.reconcile(reports);
        debug!(nodes = inner.nodes.len(), "refreshed node inventory");
        Ok(())
    }

    /// Reserves resources for one build configuration.
    ///
    /// Candidates are healthy nodes satisfying the GPU/CPU/memory demand
    /// and the architecture constraint, if any. Among candidates the one
    /// with the most free GPUs wins (largest-first packing); equally-free
    /// nodes tie-break by name so placement is stable within a process.
    /// Returns `None` when nothing fits; the coordinator re-enqueues.
    pub async fn allocate(&self, config: &BuildConfiguration) -> Option<ResourceAllocation> {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "inventory refresh failed, allocating from stale data");
        }

        let required_gpus = config.gpu_count.unwrap_or(self.settings.default_gpus);
        let required_cpu = config.cpu_cores.unwrap_or(self.settings.default_cpu_cores);
        let required_memory = config.memory_gb.unwrap_or(self.settings.default_memory_gb);
        let required_arch = config.gpu_architecture;

        let mut inner = self.inner.lock().await;

        let selected = inner
            .nodes
            .values()
            .filter(|node| {
                node.healthy
                    && node.available_gpus >= required_gpus
                    && node.available_cpu_cores >= required_cpu
                    && node.available_memory_gb >= required_memory
                    && required_arch.is_none_or(|arch| node.gpu_architectures.contains(&arch))
            })
            .max_by(|a, b| {
                a.available_gpus
                    .cmp(&b.available_gpus)
                    .then_with(|| b.node_name.cmp(&a.node_name))
            })
            .map(|node| node.node_name.clone());

        let Some(node_name) = selected else {
            warn!(
                gpus = required_gpus,
                cpu = required_cpu,
                memory_gb = required_memory,
                "no node satisfies the resource demand"
            );
            return None;
        };

        let node = inner.nodes.get_mut(&node_name)?;
        let gpu_ids: Vec<String> = node
            .available_gpu_ids
            .drain(..required_gpus as usize)
            .collect();
        node.available_gpus -= required_gpus;
        node.available_cpu_cores -= required_cpu;
        node.available_memory_gb -= required_memory;

        let allocation = ResourceAllocation {
            allocation_id: Uuid::new_v4(),
            node_name: node_name.clone(),
            gpu_ids,
            cpu_cores: required_cpu,
            memory_gb: required_memory,
            allocated_at: Utc::now(),
        };
        let _previous = inner
            .allocations
            .insert(allocation.allocation_id, allocation.clone());

        info!(
            node = %node_name,
            allocation = %allocation.allocation_id,
            gpus = allocation.gpu_ids.len(),
            cpu = required_cpu,
            memory_gb = required_memory,
            "allocated resources"
        );
        Some(allocation)
    }

    /// Returns a reservation to its node. Unknown allocation ids return
    /// false without side effects; double release is therefore harmless.
    pub async fn release(&self, allocation: &ResourceAllocation) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.allocations.remove(&allocation.allocation_id).is_none() {
            warn!(allocation = %allocation.allocation_id, "release of unknown allocation");
            return false;
        }

        if let Some(node) = inner.nodes.get_mut(&allocation.node_name) {
            node.available_gpu_ids.extend(allocation.gpu_ids.iter().cloned());
            node.available_gpus += u32::try_from(allocation.gpu_ids.len()).unwrap_or(0);
            node.available_cpu_cores += allocation.cpu_cores;
            node.available_memory_gb += allocation.memory_gb;
        }

        info!(allocation = %allocation.allocation_id, node = %allocation.node_name, "released resources");
        true
    }

    /// Fleet-wide availability over healthy nodes.
    pub async fn available(&self) -> ResourceSummary {
        let inner = self.inner.lock().await;
        let mut summary = ResourceSummary {
            total_nodes: inner.nodes.len(),
            ..ResourceSummary::default()
        };
        for node in inner.nodes.values().filter(|n| n.healthy) {
            summary.gpus += node.available_gpus;
            summary.cpu_cores += node.available_cpu_cores;
            summary.memory_gb += node.available_memory_gb;
            summary.healthy_nodes += 1;
        }
        summary
    }

    /// Per-node rows for the status façade.
    pub async fn node_status(&self) -> Vec<NodeResources> {
        let inner = self.inner.lock().await;
        let mut nodes: Vec<NodeResources> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        nodes
    }

    /// Number of outstanding reservations.
    pub async fn outstanding(&self) -> usize {
        self.inner.lock().await.allocations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticInventorySource;
    use rocforge_model::GpuArchitecture;

    fn report(name: &str, gpus: u32, arch: GpuArchitecture) -> NodeReport {
        NodeReport {
            node_name: name.to_owned(),
            gpu_ids: (0..gpus).map(|i| format!("{name}-gpu-{i}")).collect(),
            gpu_architectures: vec![arch; gpus as usize],
            total_cpu_cores: 64,
            total_memory_gb: 256.0,
            healthy: true,
        }
    }

    fn allocator(reports: Vec<NodeReport>) -> (Arc<StaticInventorySource>, ResourceAllocator) {
        let source = Arc::new(StaticInventorySource::new(reports));
        let allocator = ResourceAllocator::new(source.clone(), AllocatorSettings::default());
        (source, allocator)
    }

    #[tokio::test]
    async fn allocates_until_exhausted_then_recovers_on_release() {
        let (_, allocator) = allocator(vec![report("node-a", 2, GpuArchitecture::Gfx90a)]);

        let first = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("first allocation");
        let _second = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("second allocation");
        assert!(allocator.allocate(&BuildConfiguration::default()).await.is_none());

        assert!(allocator.release(&first).await);
        let third = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("third allocation after release");
        assert_eq!(third.node_name, "node-a");
    }

    #[tokio::test]
    async fn release_restores_availability_exactly() {
        let (_, allocator) = allocator(vec![report("node-a", 4, GpuArchitecture::Gfx90a)]);
        allocator.refresh().await.expect("refresh");
        let before = allocator.available().await;

        let allocation = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("allocation");

        let during = allocator.available().await;
        assert_eq!(during.gpus, before.gpus - 1);
        assert_eq!(during.cpu_cores, before.cpu_cores - allocation.cpu_cores);

        assert!(allocator.release(&allocation).await);
        let after = allocator.available().await;
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn refresh_preserves_outstanding_reservations() {
        let (source, allocator) = allocator(vec![report("node-a", 2, GpuArchitecture::Gfx90a)]);

        let allocation = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("allocation");

        // A new report claims both GPUs free; the reconciler must subtract
        // the outstanding reservation.
        source
            .set_reports(vec![report("node-a", 2, GpuArchitecture::Gfx90a)])
            .await;
        allocator.refresh().await.expect("refresh");

        let summary = allocator.available().await;
        assert_eq!(summary.gpus, 1);

        let nodes = allocator.node_status().await;
        assert_eq!(nodes[0].available_gpus, 1);
        assert!(!nodes[0].available_gpu_ids.contains(&allocation.gpu_ids[0]));
    }

    #[tokio::test]
    async fn vanished_node_goes_unhealthy_but_keeps_allocations() {
        let (source, allocator) = allocator(vec![
            report("node-a", 2, GpuArchitecture::Gfx90a),
            report("node-b", 2, GpuArchitecture::Gfx90a),
        ]);

        let allocation = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("allocation");

        source
            .set_reports(vec![report("node-b", 2, GpuArchitecture::Gfx90a)])
            .await;
        allocator.refresh().await.expect("refresh");

        let nodes = allocator.node_status().await;
        let node_a = nodes.iter().find(|n| n.node_name == "node-a").expect("node-a");
        assert!(!node_a.healthy);
        assert_eq!(allocator.outstanding().await, 1);

        // Releasing against the vanished node still succeeds.
        assert!(allocator.release(&allocation).await);
        assert_eq!(allocator.outstanding().await, 0);
    }

    #[tokio::test]
    async fn architecture_constraint_filters_nodes() {
        let (_, allocator) = allocator(vec![
            report("mi250-node", 4, GpuArchitecture::Gfx90a),
            report("navi-node", 8, GpuArchitecture::Gfx1030),
        ]);

        let config = BuildConfiguration {
            gpu_architecture: Some(GpuArchitecture::Gfx90a),
            ..BuildConfiguration::default()
        };
        let allocation = allocator.allocate(&config).await.expect("allocation");
        // navi-node has more free GPUs but the wrong architecture.
        assert_eq!(allocation.node_name, "mi250-node");
    }

    #[tokio::test]
    async fn prefers_node_with_most_free_gpus() {
        let (_, allocator) = allocator(vec![
            report("small", 1, GpuArchitecture::Gfx90a),
            report("big", 4, GpuArchitecture::Gfx90a),
        ]);

        let allocation = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("allocation");
        assert_eq!(allocation.node_name, "big");
    }

    #[tokio::test]
    async fn release_of_unknown_allocation_is_a_no_op() {
        let (_, allocator) = allocator(vec![report("node-a", 2, GpuArchitecture::Gfx90a)]);
        allocator.refresh().await.expect("refresh");
        let before = allocator.available().await;

        let bogus = ResourceAllocation {
            allocation_id: Uuid::new_v4(),
            node_name: "node-a".to_owned(),
            gpu_ids: vec!["node-a-gpu-0".to_owned()],
            cpu_cores: 8,
            memory_gb: 32.0,
            allocated_at: Utc::now(),
        };
        assert!(!allocator.release(&bogus).await);
        assert_eq!(allocator.available().await, before);
    }

    #[tokio::test]
    async fn accounting_invariant_holds_across_churn() {
        let (_, allocator) = allocator(vec![report("node-a", 4, GpuArchitecture::Gfx90a)]);

        let a = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("a");
        let b = allocator
            .allocate(&BuildConfiguration::default())
            .await
            .expect("b");

        let nodes = allocator.node_status().await;
        let node = &nodes[0];
        let reserved: u32 = [&a, &b]
            .iter()
            .map(|al| u32::try_from(al.gpu_ids.len()).unwrap_or(0))
            .sum();
        assert_eq!(node.available_gpus + reserved, node.total_gpus);

        assert!(allocator.release(&a).await);
        assert!(allocator.release(&b).await);
        let nodes = allocator.node_status().await;
        assert_eq!(nodes[0].available_gpus, nodes[0].total_gpus);
    }
}
