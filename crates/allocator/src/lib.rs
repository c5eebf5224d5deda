// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-node GPU/CPU/memory inventory and atomic reservation.
//!
//! The allocator maintains a map of build nodes fed by an
//! [`source::InventorySource`] and hands out [`node::ResourceAllocation`]s
//! that the coordinator owns for the dispatch lifetime. Refreshing the
//! inventory never forgets outstanding reservations: availability after a
//! refresh is always `reported_total − Σ outstanding`, so a slow cluster
//! API cannot cause double-booking.

/// Allocator state and the reserve/release operations.
pub mod allocator;
/// Errors for the allocator crate.
pub mod error;
/// Node inventory records and allocation receipts.
pub mod node;
/// Inventory sources: where node reports come from.
pub mod source;

pub use allocator::ResourceAllocator;
pub use error::Error;
pub use node::{NodeReport, NodeResources, ResourceAllocation, ResourceSummary};
pub use source::{InventorySource, LocalInventorySource, StaticInventorySource};
