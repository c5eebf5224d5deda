// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the coordinator crate.

use miette::Diagnostic;
use uuid::Uuid;

/// Errors surfaced to the callers of the coordinator façade.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The request failed boundary validation.
    #[error("Invalid build request: {source}")]
    #[diagnostic(code(rocforge::coordinator::invalid_request))]
    InvalidRequest {
        /// The validation failure.
        #[from]
        source: rocforge_model::Error,
    },

    /// The admission queue is at capacity.
    #[error("Queue is full, build {build_id} rejected")]
    #[diagnostic(
        code(rocforge::coordinator::queue_full),
        help("raise `queue.max_size` or wait for the queue to drain")
    )]
    QueueFull {
        /// Id of the rejected request.
        build_id: Uuid,
    },

    /// The request id is already queued; the submit is an idempotent no-op.
    #[error("Build {build_id} is already queued")]
    #[diagnostic(code(rocforge::coordinator::duplicate_build))]
    DuplicateBuild {
        /// The duplicated id.
        build_id: Uuid,
    },

    /// No record of the referenced build exists.
    #[error("Unknown build {build_id}")]
    #[diagnostic(code(rocforge::coordinator::unknown_build))]
    UnknownBuild {
        /// The unknown id.
        build_id: Uuid,
    },
}
