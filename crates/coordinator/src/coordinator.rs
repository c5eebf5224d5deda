// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The coordinator itself.

use crate::dispatch::BuildDispatcher;
use crate::error::Error;
use chrono::Utc;
use rocforge_allocator::{ResourceAllocator, ResourceSummary};
use rocforge_balancer::LoadBalancer;
use rocforge_config::CoordinatorSettings;
use rocforge_model::{BuildRequest, BuildStatus, BuildSummary, Priority};
use rocforge_sched::BuildQueue;
use rocforge_state::{StateManager, StatusUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Snapshot returned by [`Coordinator::queue_status`].
#[derive(Debug, Clone)]
pub struct QueueStatus {
    /// Items waiting in the queue.
    pub queue_depth: usize,
    /// Waiting items per priority class.
    pub depth_by_class: HashMap<Priority, usize>,
    /// Builds currently executing.
    pub active_builds: usize,
    /// Fleet-wide free capacity.
    pub available: ResourceSummary,
}

/// Owns the dispatcher loop and the submit/cancel/retry/status façade.
///
/// The coordinator holds every other component; none hold it back, so
/// there are no reference cycles. One `execute` task runs per in-flight
/// build, tracked so shutdown can wait for them with a bounded grace.
pub struct Coordinator {
    settings: CoordinatorSettings,
    queue: Arc<BuildQueue>,
    allocator: Arc<ResourceAllocator>,
    balancer: Arc<LoadBalancer>,
    state: Arc<StateManager>,
    dispatcher: Arc<dyn BuildDispatcher>,
    active: Mutex<HashMap<Uuid, BuildRequest>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Wires a coordinator over the shared components.
    #[must_use]
    pub fn new(
        settings: CoordinatorSettings,
        queue: Arc<BuildQueue>,
        allocator: Arc<ResourceAllocator>,
        balancer: Arc<LoadBalancer>,
        state: Arc<StateManager>,
        dispatcher: Arc<dyn BuildDispatcher>,
    ) -> Self {
        Self {
            settings,
            queue,
            allocator,
            balancer,
            state,
            dispatcher,
            active: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            loop_task: Mutex::new(None),
        }
    }

    /// Admits a build: validates at the boundary, scores its priority,
    /// records it and enqueues it. Returns the request id immediately; the
    /// loop dispatches when capacity allows.
    pub async fn submit(&self, request: BuildRequest) -> Result<Uuid, Error> {
        request.validate()?;

        let mut request = request;
        request.priority = rocforge_sched::classify(&request);
        let id = request.id;
        info!(
            build_id = %id,
            repository = %request.repository,
            commit = %request.commit_sha,
            priority = %request.priority,
            "submitting build"
        );

        if self.queue.contains(id).await {
            return Err(Error::DuplicateBuild { build_id: id });
        }

        self.state.save_request(&request).await;

        if !self.queue.enqueue(request).await {
            // The queue refused after the duplicate check: it is full.
            // Drop the state row so the rejected build cannot resurrect
            // through restart recovery.
            self.state.delete(id).await;
            return Err(Error::QueueFull { build_id: id });
        }
        Ok(id)
    }

    /// Caller-facing view of one build.
    pub async fn get_status(&self, id: Uuid) -> Option<BuildSummary> {
        let record = self.state.get_state(id).await?;
        Some(BuildSummary {
            build_id: id,
            status: record.status,
            repository: record.repository,
            branch: record.branch,
            commit_sha: record.commit_sha,
            pr_number: record.pr_number,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration_seconds: record.duration_seconds,
        })
    }

    /// Cancels a build. Queued builds are removed synchronously; running
    /// builds get a state flip the execute task observes at its next safe
    /// point. Hard termination is the worker's responsibility.
    pub async fn cancel(
        &self,
        id: Uuid,
        cancelled_by: Option<String>,
        reason: Option<String>,
    ) -> bool {
        let update = StatusUpdate {
            cancelled_by,
            cancel_reason: reason,
            ..StatusUpdate::default()
        };

        if self.queue.remove(id).await {
            self.state
                .update_status(id, BuildStatus::Cancelled, update)
                .await;
            info!(build_id = %id, "cancelled queued build");
            return true;
        }

        if self.active.lock().await.contains_key(&id) {
            self.state
                .update_status(id, BuildStatus::Cancelled, update)
                .await;
            info!(build_id = %id, "cancelled active build (advisory)");
            return true;
        }

        warn!(build_id = %id, "cancel of unknown build");
        false
    }

    /// Re-submits a finished build as a fresh request carrying
    /// `metadata.retry_of`.
    pub async fn retry(&self, id: Uuid) -> Result<Uuid, Error> {
        let original = self
            .state
            .get_request(id)
            .await
            .ok_or(Error::UnknownBuild { build_id: id })?;

        let mut metadata = original.metadata.clone();
        let _previous = metadata.insert(
            "retry_of".to_owned(),
            serde_json::Value::String(id.to_string()),
        );

        let request = BuildRequest {
            id: Uuid::new_v4(),
            metadata,
            priority: Priority::default(),
            created_at: Utc::now(),
            ..original
        };
        self.submit(request).await
    }

    /// Why a build landed in its priority class, for submitters asking
    /// what moved (or buried) their build.
    pub async fn explain_priority(&self, id: Uuid) -> Option<rocforge_sched::PriorityExplanation> {
        let request = self.state.get_request(id).await?;
        Some(rocforge_sched::explain(&request))
    }

    /// Depths, active count and free capacity in one snapshot.
    pub async fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            queue_depth: self.queue.depth().await,
            depth_by_class: self.queue.depth_by_class().await,
            active_builds: self.active.lock().await.len(),
            available: self.allocator.available().await,
        }
    }

    /// Restores pending builds from the last run, then spawns the loop.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut slot = self.loop_task.lock().await;
            if slot.is_some() {
                warn!("coordinator already started");
                return;
            }

            let mut restored = self.state.restore_pending().await;
            restored.sort_by(rocforge_sched::compare);
            for request in restored {
                // Priority was stamped at original submit; preserve it and
                // skip boundary re-validation.
                let id = request.id;
                if self.queue.contains(id).await {
                    continue;
                }
                if !self.queue.enqueue(request).await {
                    warn!(build_id = %id, "could not re-enqueue restored build");
                }
            }

            let coordinator = Arc::clone(self);
            *slot = Some(tokio::spawn(async move { coordinator.run_loop().await }));
        }
        info!("coordinator started");
    }

    /// Stops the loop and waits up to the configured grace for in-flight
    /// builds. Builds still running after the grace are checkpointed as
    /// interrupted so restart recovery re-runs them.
    pub async fn stop(&self) {
        info!("stopping coordinator");
        self.shutdown.cancel();

        let task = self.loop_task.lock().await.take();
        if let Some(handle) = task {
            if let Err(err) = handle.await {
                error!(error = %err, "dispatcher loop join failed");
            }
        }

        self.tracker.close();
        let drained = tokio::time::timeout(self.settings.shutdown_grace, self.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!("in-flight builds did not finish within the shutdown grace");
        }

        let still_active: Vec<Uuid> = self.active.lock().await.keys().copied().collect();
        for id in still_active {
            self.state
                .checkpoint(id, "interrupted", serde_json::Value::Null)
                .await;
        }
        info!("coordinator stopped");
    }

    /// The dispatcher loop: one poll per interval, one dequeue per poll
    /// when GPU capacity exists. The fixed sleep is the only back-off.
    async fn run_loop(self: Arc<Self>) {
        info!(poll_interval = ?self.settings.poll_interval, "dispatcher loop running");
        loop {
            if let Err(err) = self.allocator.refresh().await {
                warn!(error = %err, "inventory refresh failed in dispatcher loop");
            }
            let capacity = self.allocator.available().await;
            if capacity.gpus > 0 {
                if let Some((request, sequence)) = self.queue.dequeue_entry(None).await {
                    let coordinator = Arc::clone(&self);
                    let _handle = self
                        .tracker
                        .spawn(async move { coordinator.execute(request, sequence).await });
                }
            }

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        info!("dispatcher loop exited");
    }

    async fn is_cancelled(&self, id: Uuid) -> bool {
        self.state
            .get_state(id)
            .await
            .is_some_and(|record| record.status == BuildStatus::Cancelled)
    }

    /// Runs one build end to end. Shortages re-enqueue under the original
    /// arrival sequence; cancellation is observed between phases.
    async fn execute(self: Arc<Self>, request: BuildRequest, sequence: u64) {
        let id = request.id;
        let _previous = self.active.lock().await.insert(id, request.clone());

        self.run_build(&request, sequence).await;

        let _removed = self.active.lock().await.remove(&id);
    }

    async fn run_build(&self, request: &BuildRequest, sequence: u64) {
        let id = request.id;

        // Safe point: the build may have been cancelled while queued.
        if self.is_cancelled(id).await {
            info!(build_id = %id, "build cancelled before start");
            return;
        }

        self.state
            .update_status(
                id,
                BuildStatus::Running,
                StatusUpdate {
                    started_at: Some(Utc::now()),
                    ..StatusUpdate::default()
                },
            )
            .await;

        let config = request.configurations.first().cloned().unwrap_or_default();

        let Some(allocation) = self.allocator.allocate(&config).await else {
            warn!(build_id = %id, "no capacity, re-enqueueing build");
            if !self.queue.requeue(request.clone(), sequence).await {
                error!(build_id = %id, "re-enqueue failed, build is stranded until restart");
            }
            return;
        };

        let Some(worker_id) = self.balancer.select(request).await else {
            warn!(build_id = %id, "no eligible worker, re-enqueueing build");
            let _released = self.allocator.release(&allocation).await;
            if !self.queue.requeue(request.clone(), sequence).await {
                error!(build_id = %id, "re-enqueue failed, build is stranded until restart");
            }
            return;
        };

        // Safe point: last chance to observe a cancel before dispatch.
        if self.is_cancelled(id).await {
            info!(build_id = %id, "build cancelled before dispatch");
            self.balancer.update_load(&worker_id, -1).await;
            let _released = self.allocator.release(&allocation).await;
            return;
        }

        let Some(worker) = self.balancer.get(&worker_id).await else {
            // Unregistered between select and dispatch; treat as shortage.
            warn!(build_id = %id, worker = %worker_id, "selected worker vanished, re-enqueueing");
            let _released = self.allocator.release(&allocation).await;
            if !self.queue.requeue(request.clone(), sequence).await {
                error!(build_id = %id, "re-enqueue failed, build is stranded until restart");
            }
            return;
        };

        self.state
            .checkpoint(
                id,
                "dispatched",
                serde_json::json!({
                    "worker": worker_id,
                    "node": allocation.node_name,
                    "gpus": allocation.gpu_ids,
                }),
            )
            .await;
        info!(build_id = %id, worker = %worker_id, node = %allocation.node_name, "executing build");

        match self.dispatcher.dispatch(&worker, request, &allocation).await {
            Ok(result) => {
                self.state
                    .update_status(
                        id,
                        result.status,
                        StatusUpdate {
                            duration_seconds: Some(result.duration_seconds),
                            error: result.error.clone(),
                            ..StatusUpdate::default()
                        },
                    )
                    .await;
                self.balancer
                    .record_completion(&worker_id, result.duration_seconds)
                    .await;
                info!(build_id = %id, status = %result.status, "build completed");
            }
            Err(err) => {
                error!(build_id = %id, error = %err, "dispatch failed");
                self.state
                    .update_status(
                        id,
                        BuildStatus::Failed,
                        StatusUpdate {
                            error: Some(err.to_string()),
                            ..StatusUpdate::default()
                        },
                    )
                    .await;
                // The worker never ran the job; undo the selection bump.
                self.balancer.update_load(&worker_id, -1).await;
            }
        }

        let _released = self.allocator.release(&allocation).await;
        debug!(build_id = %id, "build slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NoopDispatcher;
    use rocforge_allocator::{NodeReport, StaticInventorySource};
    use rocforge_balancer::{TcpProber, WorkerProber};
    use rocforge_config::{AllocatorSettings, BalancerSettings};
    use rocforge_model::{BuildConfiguration, GpuArchitecture};
    use rocforge_state::MemoryStore;
    use std::time::Duration;

    fn request(branch: &str) -> BuildRequest {
        BuildRequest::new(
            "rocm/pytorch",
            branch,
            "abc1234",
            "webhook",
            vec![BuildConfiguration::default()],
        )
    }

    fn prober() -> Arc<dyn WorkerProber> {
        Arc::new(TcpProber::new(Duration::from_secs(5)))
    }

    fn coordinator_with_queue(max_queue: usize) -> (Arc<Coordinator>, Arc<BuildQueue>) {
        let queue = Arc::new(BuildQueue::new(max_queue));
        let source = Arc::new(StaticInventorySource::new(vec![NodeReport {
            node_name: "node-a".to_owned(),
            gpu_ids: vec!["node-a-gpu-0".to_owned()],
            gpu_architectures: vec![GpuArchitecture::Gfx90a],
            total_cpu_cores: 64,
            total_memory_gb: 256.0,
            healthy: true,
        }]));
        let allocator = Arc::new(ResourceAllocator::new(source, AllocatorSettings::default()));
        let balancer = Arc::new(LoadBalancer::new(BalancerSettings::default(), prober()));
        let state = Arc::new(StateManager::new(
            Some(Arc::new(MemoryStore::new())),
            Duration::from_secs(3600),
        ));
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorSettings::default(),
            queue.clone(),
            allocator,
            balancer,
            state,
            Arc::new(NoopDispatcher),
        ));
        (coordinator, queue)
    }

    #[tokio::test]
    async fn submit_scores_and_enqueues() {
        let (coordinator, queue) = coordinator_with_queue(10);
        let id = coordinator.submit(request("main")).await.expect("submit");

        assert_eq!(queue.depth().await, 1);
        let head = queue.peek().await.expect("head");
        assert_eq!(head.id, id);
        assert_eq!(head.priority, Priority::Critical);

        let summary = coordinator.get_status(id).await.expect("status");
        assert_eq!(summary.status, BuildStatus::Pending);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_and_duplicate() {
        let (coordinator, _queue) = coordinator_with_queue(10);

        let mut bad = request("main");
        bad.commit_sha = "xyz".to_owned();
        assert!(matches!(
            coordinator.submit(bad).await,
            Err(Error::InvalidRequest { .. })
        ));

        let req = request("main");
        let duplicate = req.clone();
        let _id = coordinator.submit(req).await.expect("submit");
        assert!(matches!(
            coordinator.submit(duplicate).await,
            Err(Error::DuplicateBuild { .. })
        ));
    }

    #[tokio::test]
    async fn submit_surfaces_queue_full_without_leaking_state() {
        let (coordinator, _queue) = coordinator_with_queue(1);
        let _first = coordinator.submit(request("main")).await.expect("submit");

        let rejected = request("feature/x");
        let rejected_id = rejected.id;
        assert!(matches!(
            coordinator.submit(rejected).await,
            Err(Error::QueueFull { .. })
        ));
        // The rejected build must not resurrect through restart recovery.
        assert!(coordinator.get_status(rejected_id).await.is_none());
    }

    #[tokio::test]
    async fn retry_builds_a_fresh_request() {
        let (coordinator, queue) = coordinator_with_queue(10);
        let original = coordinator.submit(request("main")).await.expect("submit");
        let _drained = queue.clear().await;

        let retried = coordinator.retry(original).await.expect("retry");
        assert_ne!(retried, original);

        let head = queue.peek().await.expect("head");
        assert_eq!(head.id, retried);
        assert_eq!(
            head.metadata.get("retry_of"),
            Some(&serde_json::Value::String(original.to_string()))
        );

        assert!(matches!(
            coordinator.retry(Uuid::new_v4()).await,
            Err(Error::UnknownBuild { .. })
        ));
    }

    #[tokio::test]
    async fn queue_status_reports_depths() {
        let (coordinator, _queue) = coordinator_with_queue(10);
        let _a = coordinator.submit(request("main")).await.expect("submit");
        let _b = coordinator.submit(request("feature/x")).await.expect("submit");

        let status = coordinator.queue_status().await;
        assert_eq!(status.queue_depth, 2);
        assert_eq!(status.active_builds, 0);
        assert_eq!(status.depth_by_class.get(&Priority::Critical), Some(&1));
        assert_eq!(status.depth_by_class.get(&Priority::Normal), Some(&1));
    }

    #[tokio::test]
    async fn cancel_unknown_build_returns_false() {
        let (coordinator, _queue) = coordinator_with_queue(10);
        assert!(!coordinator.cancel(Uuid::new_v4(), None, None).await);
    }

    #[tokio::test]
    async fn explain_priority_reports_factors() {
        let (coordinator, _queue) = coordinator_with_queue(10);
        let id = coordinator.submit(request("main")).await.expect("submit");

        let explanation = coordinator.explain_priority(id).await.expect("explanation");
        assert_eq!(explanation.priority, Priority::Critical);
        assert!(
            explanation
                .factors
                .iter()
                .any(|f| f.factor == "protected_branch")
        );
        assert!(coordinator.explain_priority(Uuid::new_v4()).await.is_none());
    }
}
