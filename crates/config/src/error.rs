// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while loading or validating the settings tree.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading a settings file.
    #[error("Failed to read settings file `{path}`: {source}")]
    #[diagnostic(code(rocforge::config::file_read_error))]
    FileReadError {
        /// Path of the file we tried to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An error that occurred while deserializing a settings file.
    #[error("{format} deserialization error in `{path}`: {details}")]
    #[diagnostic(code(rocforge::config::deserialization_error))]
    DeserializationError {
        /// Path of the offending file.
        path: PathBuf,
        /// The format we tried to parse ("YAML" or "JSON").
        format: &'static str,
        /// A description of the parse failure.
        details: String,
    },

    /// The settings file extension is not one we know how to parse.
    #[error("Unsupported settings file extension for `{path}` (expected .yaml, .yml or .json)")]
    #[diagnostic(code(rocforge::config::unsupported_extension))]
    UnsupportedExtension {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// A settings value failed validation.
    #[error("Invalid setting `{key}`: {reason}")]
    #[diagnostic(code(rocforge::config::invalid_setting))]
    InvalidSetting {
        /// Dotted path of the offending key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The persistence URL names a backend we do not bundle.
    #[error("Unsupported persistence scheme in `{url}` (expected file://)")]
    #[diagnostic(
        code(rocforge::config::unsupported_persistence_scheme),
        help("omit `state.persistence_url` to run purely in-memory")
    )]
    UnsupportedPersistenceScheme {
        /// The offending URL.
        url: String,
    },
}
