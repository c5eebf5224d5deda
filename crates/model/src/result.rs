// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Build results and status summaries.

use crate::status::BuildStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one dispatched build, as reported by the worker.
///
/// Workers treat duplicate dispatches for the same request id as
/// idempotent, so a result may arrive more than once after a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Id of the originating request.
    pub request_id: Uuid,
    /// Final status reported by the worker.
    pub status: BuildStatus,
    /// When the worker started the build.
    pub started_at: DateTime<Utc>,
    /// When the worker finished.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock build duration in seconds.
    pub duration_seconds: f64,
    /// Node the build ran on, when the worker reports it.
    #[serde(default)]
    pub node_name: Option<String>,
    /// Failure detail for non-successful statuses.
    #[serde(default)]
    pub error: Option<String>,
}

impl BuildResult {
    /// True when the worker reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }
}

/// One row of the status façade: the caller-facing view of a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Request id.
    pub build_id: Uuid,
    /// Current status.
    pub status: BuildStatus,
    /// Repository under build.
    pub repository: String,
    /// Branch under build.
    pub branch: String,
    /// Commit under build.
    pub commit_sha: String,
    /// Pull request number, when PR-triggered.
    #[serde(default)]
    pub pr_number: Option<u64>,
    /// When the dispatcher started the build.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the build reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds, when complete.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}
