// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker records.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Fallback duration estimate before a worker has completed anything.
pub const DEFAULT_BUILD_SECONDS: f64 = 600.0;

/// One remote build worker as the registry sees it.
///
/// `current_load` moves only through atomic increment at selection and
/// decrement at completion, and stays within `0..=max_load`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    /// Worker id, unique within the registry.
    pub worker_id: String,
    /// Dispatch address, `host:port`.
    pub address: String,
    /// Relative weight for the weighted strategy.
    pub weight: u32,
    /// In-flight builds.
    pub current_load: u32,
    /// Maximum concurrent builds.
    pub max_load: u32,
    /// False while the probe loop considers the worker unreachable.
    pub healthy: bool,
    /// When the last successful probe ran.
    pub last_health_check: DateTime<Utc>,
    /// Builds completed over the worker's lifetime.
    pub total_builds_completed: u64,
    /// Running mean of completed build durations.
    pub average_build_seconds: f64,
}

impl WorkerInfo {
    /// Creates a fresh, healthy worker with no load.
    #[must_use]
    pub fn new(
        worker_id: impl Into<String>,
        address: impl Into<String>,
        weight: u32,
        max_load: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            address: address.into(),
            weight,
            current_load: 0,
            max_load,
            healthy: true,
            last_health_check: Utc::now(),
            total_builds_completed: 0,
            average_build_seconds: DEFAULT_BUILD_SECONDS,
        }
    }

    /// Build slots still open on this worker.
    #[must_use]
    pub fn available_capacity(&self) -> u32 {
        self.max_load.saturating_sub(self.current_load)
    }

    /// Load as a percentage of capacity; a zero-capacity worker reads 100%.
    #[must_use]
    pub fn load_percentage(&self) -> f64 {
        if self.max_load == 0 {
            return 100.0;
        }
        f64::from(self.current_load) / f64::from(self.max_load) * 100.0
    }

    /// Eligible for selection: healthy with an open slot.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.healthy && self.current_load < self.max_load
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_percentage() {
        let mut worker = WorkerInfo::new("w1", "10.0.0.1:9090", 1, 4);
        assert_eq!(worker.available_capacity(), 4);
        assert_eq!(worker.load_percentage(), 0.0);

        worker.current_load = 3;
        assert_eq!(worker.available_capacity(), 1);
        assert_eq!(worker.load_percentage(), 75.0);
        assert!(worker.is_eligible());

        worker.current_load = 4;
        assert!(!worker.is_eligible());
    }

    #[test]
    fn zero_capacity_worker_is_full() {
        let worker = WorkerInfo::new("w1", "10.0.0.1:9090", 1, 0);
        assert_eq!(worker.load_percentage(), 100.0);
        assert!(!worker.is_eligible());
    }
}
