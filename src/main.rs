// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! `forge`: the rocforge control-plane binary.
//!
//! Loads the settings tree, wires the orchestration components (queue,
//! allocator, balancer, state, coordinator), registers the configured
//! workers, and runs until SIGINT, shutting down with the configured
//! grace.

use clap::Parser;
use miette::IntoDiagnostic as _;
use rocforge_allocator::{
    InventorySource, LocalInventorySource, NodeReport, ResourceAllocator, StaticInventorySource,
};
use rocforge_balancer::{LoadBalancer, TcpProber};
use rocforge_config::Settings;
use rocforge_coordinator::{Coordinator, NoopDispatcher};
use rocforge_model::GpuArchitecture;
use rocforge_sched::BuildQueue;
use rocforge_state::{FileStore, KeyValueStore, StateManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Control plane for GPU-accelerated CI builds.
#[derive(Debug, Parser)]
#[command(name = "forge", version, about)]
struct Cli {
    /// Path to the settings file (YAML or JSON). Defaults apply when
    /// omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured log level (`trace`…`error`).
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rocforge={level},forge={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
    init_tracing(level);

    info!(config = ?cli.config, "starting rocforge control plane");

    let queue = Arc::new(BuildQueue::new(settings.queue.max_size));

    let source: Arc<dyn InventorySource> = match &settings.fleet {
        Some(fleet) => {
            let reports = fleet
                .iter()
                .map(|node| NodeReport {
                    node_name: node.name.clone(),
                    gpu_ids: (0..node.gpus)
                        .map(|i| format!("{}-gpu-{i}", node.name))
                        .collect(),
                    gpu_architectures: vec![node.gpu_architecture; node.gpus as usize],
                    total_cpu_cores: node.cpu_cores,
                    total_memory_gb: node.memory_gb,
                    healthy: true,
                })
                .collect();
            Arc::new(StaticInventorySource::new(reports))
        }
        None => {
            info!("no static fleet configured, introspecting local host");
            Arc::new(LocalInventorySource::new(GpuArchitecture::Gfx90a))
        }
    };
    let allocator = Arc::new(ResourceAllocator::new(source, settings.allocator.clone()));

    let prober = Arc::new(TcpProber::new(settings.balancer.probe_timeout));
    let balancer = Arc::new(LoadBalancer::new(settings.balancer.clone(), prober));
    for worker in &settings.workers {
        balancer
            .register(
                worker.id.as_str(),
                worker.address.as_str(),
                worker.weight,
                worker.max_load,
            )
            .await
            .into_diagnostic()?;
    }

    let store: Option<Arc<dyn KeyValueStore>> = match &settings.state.persistence_url {
        Some(url) => Some(Arc::new(FileStore::from_url(url).into_diagnostic()?)),
        None => None,
    };
    let state = Arc::new(StateManager::new(store, settings.state.ttl));

    let coordinator = Arc::new(Coordinator::new(
        settings.coordinator.clone(),
        queue,
        allocator,
        balancer.clone(),
        state,
        Arc::new(NoopDispatcher),
    ));

    balancer.start_probing().await;
    coordinator.start().await;
    info!("control plane running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("shutdown requested");

    coordinator.stop().await;
    balancer.stop_probing().await;
    Ok(())
}
