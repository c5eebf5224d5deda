// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end orchestration scenarios over real components: queue,
//! allocator, balancer, state and the dispatcher loop, with only the
//! worker transport stubbed.

use async_trait::async_trait;
use rocforge_allocator::{
    InventorySource, NodeReport, ResourceAllocation, ResourceAllocator, StaticInventorySource,
};
use rocforge_balancer::{LoadBalancer, WorkerInfo, WorkerProber};
use rocforge_config::{AllocatorSettings, BalancerSettings, CoordinatorSettings};
use rocforge_coordinator::{BuildDispatcher, Coordinator, DispatchError};
use rocforge_model::{BuildConfiguration, BuildRequest, BuildStatus, GpuArchitecture, Priority};
use rocforge_sched::BuildQueue;
use rocforge_state::{KeyValueStore, MemoryStore, StateManager};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Records dispatch order and reports success after a short simulated
/// build.
struct RecordingDispatcher {
    dispatched: Mutex<Vec<Uuid>>,
    build_time: Duration,
}

impl RecordingDispatcher {
    fn new(build_time: Duration) -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            build_time,
        }
    }

    async fn order(&self) -> Vec<Uuid> {
        self.dispatched.lock().await.clone()
    }
}

#[async_trait]
impl BuildDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _worker: &WorkerInfo,
        request: &BuildRequest,
        allocation: &ResourceAllocation,
    ) -> Result<rocforge_model::BuildResult, DispatchError> {
        self.dispatched.lock().await.push(request.id);
        tokio::time::sleep(self.build_time).await;
        let now = chrono::Utc::now();
        Ok(rocforge_model::BuildResult {
            request_id: request.id,
            status: BuildStatus::Succeeded,
            started_at: now,
            completed_at: now,
            duration_seconds: self.build_time.as_secs_f64(),
            node_name: Some(allocation.node_name.clone()),
            error: None,
        })
    }
}

/// Always-reachable prober; the probe loop is not started in these tests.
struct AlwaysHealthy;

#[async_trait]
impl WorkerProber for AlwaysHealthy {
    async fn probe(&self, _worker: &WorkerInfo) -> bool {
        true
    }
}

struct Harness {
    queue: Arc<BuildQueue>,
    allocator: Arc<ResourceAllocator>,
    balancer: Arc<LoadBalancer>,
    state: Arc<StateManager>,
    dispatcher: Arc<RecordingDispatcher>,
    coordinator: Arc<Coordinator>,
}

fn node(name: &str, gpus: u32) -> NodeReport {
    NodeReport {
        node_name: name.to_owned(),
        gpu_ids: (0..gpus).map(|i| format!("{name}-gpu-{i}")).collect(),
        gpu_architectures: vec![GpuArchitecture::Gfx90a; gpus as usize],
        total_cpu_cores: 64,
        total_memory_gb: 256.0,
        healthy: true,
    }
}

fn harness(nodes: Vec<NodeReport>, store: Arc<dyn KeyValueStore>) -> Harness {
    let queue = Arc::new(BuildQueue::new(100));
    let source: Arc<dyn InventorySource> = Arc::new(StaticInventorySource::new(nodes));
    let allocator = Arc::new(ResourceAllocator::new(source, AllocatorSettings::default()));
    let balancer = Arc::new(LoadBalancer::new(
        BalancerSettings::default(),
        Arc::new(AlwaysHealthy),
    ));
    let state = Arc::new(StateManager::new(Some(store), Duration::from_secs(3600)));
    let dispatcher = Arc::new(RecordingDispatcher::new(Duration::from_millis(20)));

    let settings = CoordinatorSettings {
        poll_interval: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(2),
    };
    let coordinator = Arc::new(Coordinator::new(
        settings,
        queue.clone(),
        allocator.clone(),
        balancer.clone(),
        state.clone(),
        dispatcher.clone(),
    ));

    Harness {
        queue,
        allocator,
        balancer,
        state,
        dispatcher,
        coordinator,
    }
}

fn request(branch: &str) -> BuildRequest {
    BuildRequest::new(
        "rocm/pytorch",
        branch,
        "abc1234def",
        "webhook",
        vec![BuildConfiguration::default()],
    )
}

/// Polls `predicate` every 10ms until it holds or ~3s elapse.
async fn wait_until<F, Fut>(mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if predicate().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn fifo_within_class() {
    let h = harness(vec![node("node-a", 2)], Arc::new(MemoryStore::new()));

    let a = h.coordinator.submit(request("feature/x")).await.expect("submit a");
    let b = h.coordinator.submit(request("feature/x")).await.expect("submit b");
    let c = h.coordinator.submit(request("feature/x")).await.expect("submit c");

    for expected in [a, b, c] {
        let got = h.queue.dequeue(None).await.expect("item");
        assert_eq!(got.id, expected);
    }
}

#[tokio::test]
async fn priority_promotion() {
    let h = harness(vec![node("node-a", 2)], Arc::new(MemoryStore::new()));

    let normal = h.coordinator.submit(request("feature/x")).await.expect("submit");
    let elevated = h.coordinator.submit(request("main")).await.expect("submit");

    assert_eq!(h.queue.dequeue(None).await.expect("item").id, elevated);
    assert_eq!(h.queue.dequeue(None).await.expect("item").id, normal);
}

#[tokio::test]
async fn re_enqueue_preserves_rank_within_class() {
    // One GPU, no workers: every execute attempt re-enqueues.
    let h = harness(vec![node("node-a", 1)], Arc::new(MemoryStore::new()));

    let first = h.coordinator.submit(request("main")).await.expect("submit");
    let second = h.coordinator.submit(request("main")).await.expect("submit");
    h.coordinator.start().await;

    // Let both builds bounce through the shortage path a few times.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.dispatcher.order().await.is_empty());

    // A newer request of the same class arrives, then a worker appears.
    let third = h.coordinator.submit(request("main")).await.expect("submit");
    h.balancer
        .register("w1", "127.0.0.1:19090", 1, 5)
        .await
        .expect("register");

    let dispatcher = h.dispatcher.clone();
    let done = wait_until(move || {
        let dispatcher = dispatcher.clone();
        async move { dispatcher.order().await.len() == 3 }
    })
    .await;
    assert!(done, "all three builds should dispatch once a worker appears");

    // Re-enqueued builds kept their arrival order within the class.
    assert_eq!(h.dispatcher.order().await, vec![first, second, third]);

    h.coordinator.stop().await;
}

#[tokio::test]
async fn resource_accounting_over_allocate_release() {
    let h = harness(vec![node("node-a", 2)], Arc::new(MemoryStore::new()));
    let config = BuildConfiguration::default();

    let first = h.allocator.allocate(&config).await.expect("first");
    let second = h.allocator.allocate(&config).await.expect("second");
    assert!(h.allocator.allocate(&config).await.is_none());

    assert!(h.allocator.release(&first).await);
    let third = h.allocator.allocate(&config).await.expect("third after release");

    assert!(h.allocator.release(&second).await);
    assert!(h.allocator.release(&third).await);
    let summary = h.allocator.available().await;
    assert_eq!(summary.gpus, 2);
}

#[tokio::test]
async fn restart_recovery_requeues_pending_builds() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

    // First process: admit a build, then "crash" (drop everything but the
    // store).
    let submitted = {
        let h = harness(vec![node("node-a", 1)], store.clone());
        h.coordinator.submit(request("main")).await.expect("submit")
    };

    // Second process over the same store, with a GPU-less fleet so the
    // loop cannot drain the queue underneath the assertions.
    let h = harness(vec![node("node-a", 0)], store);
    h.coordinator.start().await;

    let head = h.queue.peek().await.expect("restored build queued");
    assert_eq!(head.id, submitted);
    assert_eq!(head.priority, Priority::Critical);

    let summary = h.coordinator.get_status(submitted).await.expect("status");
    assert_eq!(summary.status, BuildStatus::Pending);

    h.coordinator.stop().await;
}

#[tokio::test]
async fn cancellation_race_before_pickup() {
    let h = harness(vec![node("node-a", 1)], Arc::new(MemoryStore::new()));

    let id = h.coordinator.submit(request("feature/x")).await.expect("submit");
    assert!(h.coordinator.cancel(id, Some("operator".to_owned()), None).await);

    let summary = h.coordinator.get_status(id).await.expect("status");
    assert_eq!(summary.status, BuildStatus::Cancelled);
    assert!(h.queue.dequeue(None).await.is_none());
}

#[tokio::test]
async fn cancellation_of_bouncing_build_settles() {
    // No workers: the build alternates between queue and execute. Whichever
    // side the cancel lands on, the build must settle cancelled and drain.
    let h = harness(vec![node("node-a", 1)], Arc::new(MemoryStore::new()));
    h.coordinator.start().await;

    let id = h.coordinator.submit(request("feature/x")).await.expect("submit");
    tokio::time::sleep(Duration::from_millis(70)).await;

    // The build may be mid-handoff between queue and execute when the
    // cancel lands; retry until it sticks on one side or the other.
    let coordinator = h.coordinator.clone();
    let cancelled = wait_until(move || {
        let coordinator = coordinator.clone();
        async move {
            coordinator
                .cancel(id, None, Some("superseded".to_owned()))
                .await
        }
    })
    .await;
    assert!(cancelled);

    let coordinator = h.coordinator.clone();
    let drained = wait_until(move || {
        let coordinator = coordinator.clone();
        async move {
            let status = coordinator.queue_status().await;
            status.queue_depth == 0 && status.active_builds == 0
        }
    })
    .await;
    assert!(drained, "cancelled build should leave the system");

    let summary = h.coordinator.get_status(id).await.expect("status");
    assert_eq!(summary.status, BuildStatus::Cancelled);
    assert!(h.dispatcher.order().await.is_empty());

    h.coordinator.stop().await;
}

#[tokio::test]
async fn happy_path_releases_everything() {
    let h = harness(vec![node("node-a", 2)], Arc::new(MemoryStore::new()));
    h.balancer
        .register("w1", "127.0.0.1:19090", 1, 5)
        .await
        .expect("register");
    h.coordinator.start().await;

    let first = h.coordinator.submit(request("main")).await.expect("submit");
    let second = h.coordinator.submit(request("feature/x")).await.expect("submit");

    let coordinator = h.coordinator.clone();
    let done = wait_until(move || {
        let coordinator = coordinator.clone();
        async move {
            let first_done = matches!(
                coordinator.get_status(first).await,
                Some(s) if s.status == BuildStatus::Succeeded
            );
            let second_done = matches!(
                coordinator.get_status(second).await,
                Some(s) if s.status == BuildStatus::Succeeded
            );
            first_done && second_done
        }
    })
    .await;
    assert!(done, "both builds should succeed");

    h.coordinator.stop().await;

    // Allocations are released, worker load is back to zero, completions
    // are recorded, and the dispatch checkpoint exists.
    let summary = h.allocator.available().await;
    assert_eq!(summary.gpus, 2);
    assert_eq!(h.allocator.outstanding().await, 0);

    let workers = h.balancer.worker_stats().await;
    assert_eq!(workers[0].current_load, 0);
    assert_eq!(workers[0].total_builds_completed, 2);

    let checkpoint = h.state.latest_checkpoint(first).await.expect("checkpoint");
    assert_eq!(checkpoint.stage, "dispatched");

    let status = h.coordinator.queue_status().await;
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.active_builds, 0);
}
