// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The coordinator: one dispatcher loop tying the queue, allocator,
//! balancer and state manager together.
//!
//! ```text
//! webhook ──submit──▶ ┌─────────────┐        ┌───────────┐
//!                     │ Coordinator │──poll──▶   Queue   │
//!                     └──────┬──────┘        └───────────┘
//!                            │ execute (one task per build)
//!            ┌───────────────┼──────────────────┐
//!            ▼               ▼                  ▼
//!      ┌───────────┐  ┌─────────────┐   ┌──────────────┐
//!      │ Allocator │  │  Balancer   │   │ StateManager │
//!      └───────────┘  └──────┬──────┘   └──────────────┘
//!                            │ dispatch
//!                            ▼
//!                     remote build worker
//! ```
//!
//! Transient shortages (no node capacity, no eligible worker) never fail a
//! build: the request is re-enqueued under its original arrival sequence,
//! so it keeps its place within its priority class. Hard failures mark the
//! build `Failed`. Delivery to workers is at-least-once; workers treat
//! duplicate dispatches as idempotent.

/// The coordinator itself.
pub mod coordinator;
/// The outbound dispatch boundary.
pub mod dispatch;
/// Errors for the coordinator crate.
pub mod error;

pub use coordinator::{Coordinator, QueueStatus};
pub use dispatch::{BuildDispatcher, DispatchError, NoopDispatcher};
pub use error::Error;
