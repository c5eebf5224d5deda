// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Selection strategies.
//!
//! A strategy sees only eligible workers (healthy, with an open slot) and
//! returns an index into that slice. Strategies carry their own cursor or
//! randomness; the registry lock serializes calls.

use crate::worker::{DEFAULT_BUILD_SECONDS, WorkerInfo};
use rand::RngExt as _;
use rocforge_config::SelectionStrategyKind;
use rocforge_model::BuildRequest;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks one worker among the eligible candidates.
pub trait SelectionStrategy: Send + Sync {
    /// Returns the index of the chosen candidate, or `None` to decline.
    /// `candidates` is never empty.
    fn pick(&self, candidates: &[WorkerInfo], request: &BuildRequest) -> Option<usize>;
}

/// Builds the strategy implementation for a configured kind.
#[must_use]
pub fn strategy_for(kind: SelectionStrategyKind) -> Box<dyn SelectionStrategy> {
    match kind {
        SelectionStrategyKind::RoundRobin => Box::new(RoundRobin::default()),
        SelectionStrategyKind::LeastConnections => Box::new(LeastConnections),
        SelectionStrategyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin),
        SelectionStrategyKind::Random => Box::new(Uniform),
        SelectionStrategyKind::ResourceAware => Box::new(ResourceAware),
    }
}

/// Circular order over the eligible set.
#[derive(Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl SelectionStrategy for RoundRobin {
    fn pick(&self, candidates: &[WorkerInfo], _request: &BuildRequest) -> Option<usize> {
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(cursor % candidates.len())
    }
}

/// Fewest in-flight builds wins.
pub struct LeastConnections;

impl SelectionStrategy for LeastConnections {
    fn pick(&self, candidates: &[WorkerInfo], _request: &BuildRequest) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.current_load)
            .map(|(i, _)| i)
    }
}

/// Probability proportional to `weight × available_capacity`.
pub struct WeightedRoundRobin;

impl SelectionStrategy for WeightedRoundRobin {
    fn pick(&self, candidates: &[WorkerInfo], request: &BuildRequest) -> Option<usize> {
        let total: u64 = candidates
            .iter()
            .map(|w| u64::from(w.weight) * u64::from(w.available_capacity()))
            .sum();
        if total == 0 {
            // Every weight is zero; fall back to least connections.
            return LeastConnections.pick(candidates, request);
        }

        let target = rand::rng().random_range(1..=total);
        let mut accumulated = 0;
        for (i, worker) in candidates.iter().enumerate() {
            accumulated += u64::from(worker.weight) * u64::from(worker.available_capacity());
            if accumulated >= target {
                return Some(i);
            }
        }
        Some(candidates.len() - 1)
    }
}

/// Uniform over the eligible set.
pub struct Uniform;

impl SelectionStrategy for Uniform {
    fn pick(&self, candidates: &[WorkerInfo], _request: &BuildRequest) -> Option<usize> {
        Some(rand::rng().random_range(0..candidates.len()))
    }
}

/// Scored blend of load headroom, slot capacity and historical speed:
/// `0.4·(1 − load/max) + 0.3·(capacity/max) + 0.3·min(1, 600/avg)`, with
/// the speed term fixed at 0.15 until the worker has completed something.
pub struct ResourceAware;

impl ResourceAware {
    fn score(worker: &WorkerInfo) -> f64 {
        let max = f64::from(worker.max_load.max(1));
        let load_score = 1.0 - f64::from(worker.current_load) / max;
        let capacity_score = f64::from(worker.available_capacity()) / max;

        let speed_score = if worker.total_builds_completed > 0 {
            (DEFAULT_BUILD_SECONDS / worker.average_build_seconds.max(1.0)).min(1.0)
        } else {
            0.5
        };

        load_score * 0.4 + capacity_score * 0.3 + speed_score * 0.3
    }
}

impl SelectionStrategy for ResourceAware {
    fn pick(&self, candidates: &[WorkerInfo], _request: &BuildRequest) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                Self::score(a)
                    .partial_cmp(&Self::score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
    }
}
