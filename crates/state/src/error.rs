// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the state crate.

/// Errors that can occur in a persistence backend.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O failure while talking to the backend.
    #[error("Store I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A stored record failed to serialize or deserialize.
    #[error("Store serialization error: {details}")]
    Serialization {
        /// A description of the failure.
        details: String,
    },

    /// The persistence URL could not be turned into a backend.
    #[error("Invalid persistence URL `{url}`: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            details: err.to_string(),
        }
    }
}
