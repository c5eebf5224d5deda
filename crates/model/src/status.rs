// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Status, priority and target-platform vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a build.
///
/// The orchestration lifecycle is monotonic along
/// `Pending → Running → {Succeeded, Failed, Cancelled, Timeout}`. `Queued`
/// and `Skipped` exist for the webhook surface and never appear on the
/// orchestration path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Accepted, not yet picked up by the dispatcher.
    Pending,
    /// Accepted by the webhook surface, not yet admitted.
    Queued,
    /// Dispatched and executing on a worker.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with a build or dispatch failure.
    Failed,
    /// Cancelled by an operator or the webhook surface.
    Cancelled,
    /// Terminated by the worker after exceeding its time budget.
    Timeout,
    /// Skipped at the boundary (e.g. `[skip ci]`).
    Skipped,
}

impl BuildStatus {
    /// True once the build can no longer change status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Timeout | Self::Skipped
        )
    }

    /// Total order backing the monotonicity check: a transition to a status
    /// with a lower rank than the current one is a regression.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Timeout | Self::Skipped => 3,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Coarse priority bucket derived from the scoring policy.
///
/// Dispatch order is `Critical < High < Normal < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Dispatched before everything else.
    Critical,
    /// Release and hotfix traffic.
    High,
    /// The default bucket.
    Normal,
    /// Bot traffic and drafts.
    Low,
}

impl Priority {
    /// Numeric value used as the primary queue ordering key. Lower values
    /// dequeue first; the gaps leave room for intermediate classes.
    #[must_use]
    pub fn queue_value(self) -> u16 {
        match self {
            Self::Critical => 0,
            Self::High => 100,
            Self::Normal => 200,
            Self::Low => 300,
        }
    }

    /// All classes in dispatch order.
    #[must_use]
    pub fn all() -> [Priority; 4] {
        [Self::Critical, Self::High, Self::Normal, Self::Low]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// AMD GPU architectures the build fleet targets.
///
/// Unknown architecture strings fail deserialization at the boundary rather
/// than flowing into the allocator as free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum GpuArchitecture {
    Gfx900,
    Gfx906,
    Gfx908,
    Gfx90a,
    Gfx1030,
    Gfx1100,
    Gfx1101,
}

impl fmt::Display for GpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gfx900 => "gfx900",
            Self::Gfx906 => "gfx906",
            Self::Gfx908 => "gfx908",
            Self::Gfx90a => "gfx90a",
            Self::Gfx1030 => "gfx1030",
            Self::Gfx1100 => "gfx1100",
            Self::Gfx1101 => "gfx1101",
        };
        f.write_str(s)
    }
}

/// CMake build flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    /// Unoptimized with debug info.
    Debug,
    /// Optimized (default).
    #[default]
    Release,
    /// Optimized with debug info.
    RelWithDebInfo,
}
