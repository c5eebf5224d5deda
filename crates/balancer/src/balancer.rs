// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The registry and its operations.

use crate::error::Error;
use crate::probe::WorkerProber;
use crate::strategy::{SelectionStrategy, strategy_for};
use crate::worker::WorkerInfo;
use chrono::Utc;
use rocforge_config::BalancerSettings;
use rocforge_model::BuildRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker registry with strategy-driven selection and background health
/// probing.
///
/// `select` and the load accounting methods are atomic with respect to each
/// other; a worker's `current_load` never escapes `0..=max_load`.
pub struct LoadBalancer {
    settings: BalancerSettings,
    strategy: Box<dyn SelectionStrategy>,
    prober: Arc<dyn WorkerProber>,
    workers: Mutex<HashMap<String, WorkerInfo>>,
    probe_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl LoadBalancer {
    /// Creates a balancer with the configured strategy and the given
    /// prober.
    #[must_use]
    pub fn new(settings: BalancerSettings, prober: Arc<dyn WorkerProber>) -> Self {
        let strategy = strategy_for(settings.strategy);
        Self {
            settings,
            strategy,
            prober,
            workers: Mutex::new(HashMap::new()),
            probe_task: Mutex::new(None),
        }
    }

    /// Adds a worker to the registry.
    pub async fn register(
        &self,
        worker_id: impl Into<String>,
        address: impl Into<String>,
        weight: u32,
        max_load: u32,
    ) -> Result<(), Error> {
        let worker_id = worker_id.into();
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&worker_id) {
            return Err(Error::AlreadyRegistered { worker_id });
        }
        let worker = WorkerInfo::new(worker_id.clone(), address, weight, max_load);
        info!(worker = %worker_id, address = %worker.address, "registered worker");
        let _previous = workers.insert(worker_id, worker);
        Ok(())
    }

    /// Removes a worker. Returns false for unknown ids.
    pub async fn unregister(&self, worker_id: &str) -> bool {
        let removed = self.workers.lock().await.remove(worker_id).is_some();
        if removed {
            info!(worker = %worker_id, "unregistered worker");
        }
        removed
    }

    /// Selects a worker for `request` and bumps its load in the same
    /// critical section. Returns `None` when no eligible worker exists.
    pub async fn select(&self, request: &BuildRequest) -> Option<String> {
        let mut workers = self.workers.lock().await;

        let mut candidates: Vec<WorkerInfo> =
            workers.values().filter(|w| w.is_eligible()).cloned().collect();
        if candidates.is_empty() {
            warn!(build_id = %request.id, "no eligible worker for build");
            return None;
        }
        // Stable candidate order so stateful strategies see a consistent view.
        candidates.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

        let picked = self.strategy.pick(&candidates, request)?;
        let worker_id = candidates.get(picked)?.worker_id.clone();

        let worker = workers.get_mut(&worker_id)?;
        worker.current_load += 1;
        debug!(
            worker = %worker_id,
            load = worker.current_load,
            max = worker.max_load,
            "selected worker"
        );
        Some(worker_id)
    }

    /// Adjusts a worker's load by `delta`, clamped to `0..=max_load`.
    pub async fn update_load(&self, worker_id: &str, delta: i64) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            let load = i64::from(worker.current_load) + delta;
            let load = load.clamp(0, i64::from(worker.max_load));
            worker.current_load = u32::try_from(load).unwrap_or(0);
            debug!(worker = %worker_id, load = worker.current_load, "updated worker load");
        }
    }

    /// Records a completed build: decrements load and folds the duration
    /// into the running mean.
    pub async fn record_completion(&self, worker_id: &str, duration_seconds: f64) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.current_load = worker.current_load.saturating_sub(1);
            worker.total_builds_completed += 1;

            #[allow(clippy::cast_precision_loss)]
            let n = worker.total_builds_completed as f64;
            worker.average_build_seconds =
                ((n - 1.0) * worker.average_build_seconds + duration_seconds) / n;
        }
    }

    /// Marks a worker healthy and stamps its probe time.
    pub async fn mark_healthy(&self, worker_id: &str) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            if !worker.healthy {
                info!(worker = %worker_id, "worker is healthy again");
            }
            worker.healthy = true;
            worker.last_health_check = Utc::now();
        }
    }

    /// Marks a worker unhealthy, excluding it from selection.
    pub async fn mark_unhealthy(&self, worker_id: &str) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            if worker.healthy {
                warn!(worker = %worker_id, "marking worker unhealthy");
            }
            worker.healthy = false;
        }
    }

    /// Snapshot of one worker.
    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.lock().await.get(worker_id).cloned()
    }

    /// Snapshot of the whole registry, sorted by worker id.
    pub async fn worker_stats(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.lock().await;
        let mut stats: Vec<WorkerInfo> = workers.values().cloned().collect();
        stats.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        stats
    }

    /// Starts the background probe loop. Idempotent: a second call replaces
    /// nothing and logs.
    pub async fn start_probing(self: &Arc<Self>) {
        let mut slot = self.probe_task.lock().await;
        if slot.is_some() {
            warn!("probe loop already running");
            return;
        }

        let token = CancellationToken::new();
        let balancer = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(balancer.settings.health_interval);
            // The first tick fires immediately; skip it so freshly
            // registered workers are not probed before they listen.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    _ = interval.tick() => balancer.probe_all().await,
                }
            }
        });
        *slot = Some((token, handle));
        info!(interval = ?self.settings.health_interval, "probe loop started");
    }

    /// Stops the probe loop and waits for it to exit.
    pub async fn stop_probing(&self) {
        let task = self.probe_task.lock().await.take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(err) = handle.await {
                warn!(error = %err, "probe loop join failed");
            }
            info!("probe loop stopped");
        }
    }

    async fn probe_all(&self) {
        let snapshot: Vec<WorkerInfo> = {
            let workers = self.workers.lock().await;
            workers.values().cloned().collect()
        };

        for worker in snapshot {
            let healthy = self.prober.probe(&worker).await;
            if healthy {
                self.mark_healthy(&worker.worker_id).await;
            } else {
                self.mark_unhealthy(&worker.worker_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rocforge_model::BuildConfiguration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StubProber {
        healthy: AtomicBool,
    }

    impl StubProber {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
            }
        }
    }

    #[async_trait]
    impl WorkerProber for StubProber {
        async fn probe(&self, _worker: &WorkerInfo) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }
    }

    fn request() -> BuildRequest {
        BuildRequest::new(
            "rocm/pytorch",
            "main",
            "abc1234",
            "webhook",
            vec![BuildConfiguration::default()],
        )
    }

    fn balancer(prober: Arc<dyn WorkerProber>) -> LoadBalancer {
        LoadBalancer::new(BalancerSettings::default(), prober)
    }

    #[tokio::test]
    async fn select_bumps_load_and_respects_capacity() {
        let lb = balancer(Arc::new(StubProber::new(true)));
        lb.register("w1", "10.0.0.1:9090", 1, 2).await.expect("register");

        assert_eq!(lb.select(&request()).await.as_deref(), Some("w1"));
        assert_eq!(lb.select(&request()).await.as_deref(), Some("w1"));
        // Full: nothing eligible.
        assert!(lb.select(&request()).await.is_none());

        let worker = lb.get("w1").await.expect("worker");
        assert_eq!(worker.current_load, 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_an_error() {
        let lb = balancer(Arc::new(StubProber::new(true)));
        lb.register("w1", "10.0.0.1:9090", 1, 2).await.expect("register");
        assert!(matches!(
            lb.register("w1", "10.0.0.2:9090", 1, 2).await,
            Err(Error::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn unhealthy_workers_are_excluded() {
        let lb = balancer(Arc::new(StubProber::new(true)));
        lb.register("w1", "10.0.0.1:9090", 1, 5).await.expect("register");
        lb.register("w2", "10.0.0.2:9090", 1, 5).await.expect("register");

        lb.mark_unhealthy("w1").await;
        for _ in 0..5 {
            assert_eq!(lb.select(&request()).await.as_deref(), Some("w2"));
        }

        lb.mark_healthy("w1").await;
        let stats = lb.worker_stats().await;
        assert!(stats.iter().all(|w| w.healthy));
    }

    #[tokio::test]
    async fn record_completion_updates_running_mean() {
        let lb = balancer(Arc::new(StubProber::new(true)));
        lb.register("w1", "10.0.0.1:9090", 1, 5).await.expect("register");

        let _ = lb.select(&request()).await.expect("selected");
        lb.record_completion("w1", 100.0).await;
        let worker = lb.get("w1").await.expect("worker");
        assert_eq!(worker.current_load, 0);
        assert_eq!(worker.total_builds_completed, 1);
        assert_eq!(worker.average_build_seconds, 100.0);

        lb.record_completion("w1", 300.0).await;
        let worker = lb.get("w1").await.expect("worker");
        assert_eq!(worker.average_build_seconds, 200.0);
    }

    #[tokio::test]
    async fn completion_never_drives_load_negative() {
        let lb = balancer(Arc::new(StubProber::new(true)));
        lb.register("w1", "10.0.0.1:9090", 1, 5).await.expect("register");

        lb.record_completion("w1", 10.0).await;
        lb.update_load("w1", -3).await;
        let worker = lb.get("w1").await.expect("worker");
        assert_eq!(worker.current_load, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_flags_unreachable_workers() {
        let prober = Arc::new(StubProber::new(false));
        let lb = Arc::new(LoadBalancer::new(
            BalancerSettings {
                health_interval: Duration::from_secs(1),
                ..BalancerSettings::default()
            },
            prober.clone(),
        ));
        lb.register("w1", "10.0.0.1:9090", 1, 5).await.expect("register");

        lb.start_probing().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!lb.get("w1").await.expect("worker").healthy);

        // Worker comes back; the next probe round clears the flag.
        prober.healthy.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(lb.get("w1").await.expect("worker").healthy);

        lb.stop_probing().await;
    }
}
