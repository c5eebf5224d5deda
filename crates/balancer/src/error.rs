// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the balancer crate.

/// Errors that can occur in the load balancer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A worker id was registered twice.
    #[error("Worker `{worker_id}` is already registered")]
    AlreadyRegistered {
        /// The duplicated worker id.
        worker_id: String,
    },
}
