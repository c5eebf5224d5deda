// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker liveness probes.

use crate::worker::WorkerInfo;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Decides whether a worker is reachable. Implementations must bound their
/// own latency; the probe loop runs them sequentially.
#[async_trait]
pub trait WorkerProber: Send + Sync {
    /// Probes one worker. True means reachable.
    async fn probe(&self, worker: &WorkerInfo) -> bool;
}

/// Probes by opening a TCP connection to the worker's dispatch address.
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Creates a prober with the given per-probe timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl WorkerProber for TcpProber {
    async fn probe(&self, worker: &WorkerInfo) -> bool {
        let connect = tokio::net::TcpStream::connect(&worker.address);
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                debug!(worker = %worker.worker_id, error = %err, "probe connect failed");
                false
            }
            Err(_) => {
                debug!(worker = %worker.worker_id, "probe timed out");
                false
            }
        }
    }
}
