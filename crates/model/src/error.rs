// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while validating inbound records.

/// Errors that can occur while validating a build request at the boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The commit identifier is missing or malformed.
    #[error("Invalid commit sha `{sha}`: {reason}")]
    InvalidCommitSha {
        /// The offending commit identifier.
        sha: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The ROCm version string does not parse as `major.minor[.patch]`.
    #[error("Invalid ROCm version `{version}`")]
    InvalidRocmVersion {
        /// The offending version string.
        version: String,
    },

    /// The Python version is not in the supported set.
    #[error("Unsupported Python version `{version}`")]
    UnsupportedPythonVersion {
        /// The offending version string.
        version: String,
    },

    /// A non-skeletal request arrived without any build configuration.
    #[error("Build request {request_id} has no configurations")]
    NoConfigurations {
        /// Id of the rejected request.
        request_id: uuid::Uuid,
    },

    /// A skeletal request arrived outside the one legitimate trigger.
    #[error("Skeletal build request {request_id} is only valid for rebuild comments")]
    SkeletalNotAllowed {
        /// Id of the rejected request.
        request_id: uuid::Uuid,
    },
}
