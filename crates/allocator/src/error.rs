// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the allocator crate.

/// Errors that can occur while refreshing the node inventory.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The inventory source could not be reached or returned garbage.
    #[error("Inventory source error: {details}")]
    SourceUnavailable {
        /// A description of the failure.
        details: String,
    },

    /// Local GPU detection failed to execute.
    #[error("GPU probe failed: {source}")]
    GpuProbeFailed {
        /// Underlying I/O error from spawning the probe.
        #[source]
        source: std::io::Error,
    },
}
