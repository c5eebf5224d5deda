// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Inventory sources: where node reports come from.
//!
//! The allocator only ever sees [`NodeReport`]s; whether they come from a
//! static fleet description, local-host introspection or (elsewhere) a
//! cluster API is behind this seam.

use crate::error::Error;
use crate::node::NodeReport;
use async_trait::async_trait;
use rocforge_model::GpuArchitecture;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How long the local GPU probe may run before we give up on it.
const GPU_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Yields the current node inventory.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Fetches a report for every known node. A node absent from the
    /// returned list is treated as gone and marked unhealthy.
    async fn fetch(&self) -> Result<Vec<NodeReport>, Error>;
}

/// A fixed fleet, declared in configuration or by tests. Reports can be
/// swapped at runtime to simulate inventory changes.
pub struct StaticInventorySource {
    reports: Mutex<Vec<NodeReport>>,
}

impl StaticInventorySource {
    /// Creates a source over a fixed report list.
    #[must_use]
    pub fn new(reports: Vec<NodeReport>) -> Self {
        Self {
            reports: Mutex::new(reports),
        }
    }

    /// Replaces the report list wholesale.
    pub async fn set_reports(&self, reports: Vec<NodeReport>) {
        *self.reports.lock().await = reports;
    }
}

#[async_trait]
impl InventorySource for StaticInventorySource {
    async fn fetch(&self) -> Result<Vec<NodeReport>, Error> {
        Ok(self.reports.lock().await.clone())
    }
}

/// Introspects the local host: CPU and memory via sysinfo, GPUs by probing
/// `rocm-smi`. Produces a single-node fleet, useful for standalone
/// deployments and development.
pub struct LocalInventorySource {
    gpu_architecture: GpuArchitecture,
}

impl LocalInventorySource {
    /// Creates a local source assuming all GPUs share `gpu_architecture`.
    #[must_use]
    pub fn new(gpu_architecture: GpuArchitecture) -> Self {
        Self { gpu_architecture }
    }

    /// Counts local GPUs by asking `rocm-smi` for device ids. Degrades to
    /// zero on any failure: a CPU-only host is a valid (if useless) fleet.
    async fn detect_gpus(&self) -> u32 {
        let probe = tokio::process::Command::new("rocm-smi")
            .arg("--showid")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output();

        let output = match tokio::time::timeout(GPU_PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!(status = %output.status, "rocm-smi exited non-zero");
                return 0;
            }
            Ok(Err(err)) => {
                debug!(error = %err, "rocm-smi not available");
                return 0;
            }
            Err(_) => {
                warn!("rocm-smi probe timed out");
                return 0;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let count = stdout.lines().filter(|line| line.contains("GPU")).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

#[async_trait]
impl InventorySource for LocalInventorySource {
    async fn fetch(&self) -> Result<Vec<NodeReport>, Error> {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_all();

        let node_name = System::host_name().unwrap_or_else(|| "local".to_owned());
        let total_cpu_cores = u32::try_from(system.cpus().len()).unwrap_or(u32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let total_memory_gb = system.total_memory() as f64 / f64::from(1u32 << 30);

        let gpu_count = self.detect_gpus().await;
        let gpu_ids: Vec<String> = (0..gpu_count).map(|i| format!("gpu-{i}")).collect();
        let gpu_architectures = vec![self.gpu_architecture; gpu_count as usize];

        Ok(vec![NodeReport {
            node_name,
            gpu_ids,
            gpu_architectures,
            total_cpu_cores,
            total_memory_gb,
            healthy: true,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str) -> NodeReport {
        NodeReport {
            node_name: name.to_owned(),
            gpu_ids: vec![format!("{name}-gpu-0")],
            gpu_architectures: vec![GpuArchitecture::Gfx90a],
            total_cpu_cores: 32,
            total_memory_gb: 128.0,
            healthy: true,
        }
    }

    #[tokio::test]
    async fn static_source_returns_and_swaps_reports() {
        let source = StaticInventorySource::new(vec![report("node-a")]);
        let fetched = source.fetch().await.expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].node_name, "node-a");

        source
            .set_reports(vec![report("node-a"), report("node-b")])
            .await;
        let fetched = source.fetch().await.expect("fetch");
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn local_source_reports_one_node() {
        let source = LocalInventorySource::new(GpuArchitecture::Gfx90a);
        let fetched = source.fetch().await.expect("fetch");
        assert_eq!(fetched.len(), 1);
        assert!(fetched[0].healthy);
        assert_eq!(fetched[0].gpu_ids.len(), fetched[0].gpu_architectures.len());
    }
}
