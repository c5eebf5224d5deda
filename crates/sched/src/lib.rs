// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Priority scoring policy and bounded admission queue.
//!
//! `priority` is the pure half: it maps a build request to a score, a
//! priority class and a comparator, with no state of its own. `queue` is
//! the stateful half: a bounded priority queue ordered by class then
//! arrival, with by-id indexing for removal, reprioritization and position
//! queries.

/// The pure scoring policy: score, classify, compare, preemption predicate.
pub mod priority;
/// The bounded priority queue.
pub mod queue;

pub use priority::{PriorityExplanation, classify, compare, explain, score, should_preempt};
pub use queue::BuildQueue;
