// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Build state, checkpoints and pluggable persistence.
//!
//! The in-memory maps are authoritative; a configured [`store::KeyValueStore`]
//! mirrors them best-effort so a restart can recover pending and running
//! builds. A lost write therefore means a build re-runs: the dispatch
//! contract is at-least-once and workers treat duplicates as idempotent.

/// Errors for the state crate.
pub mod error;
/// The state manager and its records.
pub mod manager;
/// Key-value persistence backends.
pub mod store;

pub use error::Error;
pub use manager::{BuildStateRecord, Checkpoint, StateManager, StatusUpdate};
pub use store::{FileStore, KeyValueStore, MemoryStore};
