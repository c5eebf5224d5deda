// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker registry, selection strategies and health probing.
//!
//! The balancer keeps the registry of remote build workers, selects one per
//! dispatch under a strategy fixed at construction, accounts in-flight load,
//! and runs a background probe loop that flags unreachable workers. Probes
//! are advisory: an unhealthy worker is merely excluded from selection until
//! a later probe succeeds.

/// The registry and its operations.
pub mod balancer;
/// Errors for the balancer crate.
pub mod error;
/// Worker liveness probes.
pub mod probe;
/// Selection strategies.
pub mod strategy;
/// Worker records.
pub mod worker;

pub use balancer::LoadBalancer;
pub use error::Error;
pub use probe::{TcpProber, WorkerProber};
pub use strategy::{SelectionStrategy, strategy_for};
pub use worker::WorkerInfo;
