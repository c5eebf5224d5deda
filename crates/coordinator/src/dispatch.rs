// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The outbound dispatch boundary.
//!
//! The builder process is a remote collaborator: the coordinator's only
//! obligation is one `dispatch` call per execution attempt. Because the
//! control plane guarantees at-least-once delivery across crashes, workers
//! must treat duplicate dispatches for the same request id as idempotent.

use async_trait::async_trait;
use chrono::Utc;
use rocforge_allocator::ResourceAllocation;
use rocforge_balancer::WorkerInfo;
use rocforge_model::{BuildRequest, BuildResult, BuildStatus};
use tracing::info;

/// Errors crossing the dispatch boundary.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    /// The worker could not be reached or dropped the connection.
    #[error("Transport error dispatching to `{worker_id}`: {details}")]
    Transport {
        /// The worker we failed to reach.
        worker_id: String,
        /// A description of the failure.
        details: String,
    },

    /// The worker refused the job outright.
    #[error("Worker `{worker_id}` rejected the dispatch: {details}")]
    Rejected {
        /// The refusing worker.
        worker_id: String,
        /// The worker's stated reason.
        details: String,
    },
}

/// Sends one build to one worker and waits for its result.
#[async_trait]
pub trait BuildDispatcher: Send + Sync {
    /// Dispatches `request` to `worker` with the resources in `allocation`
    /// and awaits the build result.
    async fn dispatch(
        &self,
        worker: &WorkerInfo,
        request: &BuildRequest,
        allocation: &ResourceAllocation,
    ) -> Result<BuildResult, DispatchError>;
}

/// Stand-in dispatcher used until a worker transport is wired: logs the
/// dispatch and acknowledges immediately with a successful result.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl BuildDispatcher for NoopDispatcher {
    async fn dispatch(
        &self,
        worker: &WorkerInfo,
        request: &BuildRequest,
        allocation: &ResourceAllocation,
    ) -> Result<BuildResult, DispatchError> {
        info!(
            build_id = %request.id,
            worker = %worker.worker_id,
            address = %worker.address,
            node = %allocation.node_name,
            gpus = allocation.gpu_ids.len(),
            "dispatching build (no-op transport)"
        );
        let now = Utc::now();
        Ok(BuildResult {
            request_id: request.id,
            status: BuildStatus::Succeeded,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            node_name: Some(allocation.node_name.clone()),
            error: None,
        })
    }
}
