// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Domain records shared across the rocforge control plane.
//!
//! Everything the orchestration core exchanges with its collaborators is
//! defined here: build requests and their per-configuration scheduling
//! units, the status/priority vocabulary, and the result/summary records
//! surfaced by the status façade. All records are serde-enabled; persisted
//! forms are JSON.

/// Errors raised while validating inbound records.
pub mod error;
/// Build requests and per-configuration scheduling units.
pub mod request;
/// Build results and status summaries.
pub mod result;
/// Status, priority and target-platform vocabulary.
pub mod status;

pub use error::Error;
pub use request::{BuildConfiguration, BuildRequest};
pub use result::{BuildResult, BuildSummary};
pub use status::{BuildStatus, BuildType, GpuArchitecture, Priority};
