// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Build requests and per-configuration scheduling units.

use crate::error::Error;
use crate::status::{BuildType, GpuArchitecture, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Python versions the build images ship.
pub const SUPPORTED_PYTHON_VERSIONS: [&str; 5] = ["3.8", "3.9", "3.10", "3.11", "3.12"];

fn default_python_version() -> String {
    "3.10".to_owned()
}

fn default_parallel_jobs() -> u32 {
    8
}

/// One concrete build matrix entry: the unit of scheduling.
///
/// A request carries one or more configurations; the allocator sizes its
/// reservation from the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// ROCm toolchain version, `major.minor[.patch]`.
    pub rocm_version: String,
    /// Target GPU architecture; when set, the allocator only places the
    /// build on nodes carrying that architecture.
    #[serde(default)]
    pub gpu_architecture: Option<GpuArchitecture>,
    /// CMake build flavor.
    #[serde(default)]
    pub build_type: BuildType,
    /// Python version for the build environment.
    #[serde(default = "default_python_version")]
    pub python_version: String,
    /// GPUs to reserve; `None` means the allocator default (1).
    #[serde(default)]
    pub gpu_count: Option<u32>,
    /// CPU cores to reserve; `None` means the allocator default.
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    /// Memory to reserve in GB; `None` means the allocator default.
    #[serde(default)]
    pub memory_gb: Option<f64>,
    /// Extra flags appended to the CMake invocation.
    #[serde(default)]
    pub cmake_flags: Vec<String>,
    /// Extra environment variables for the build container.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Parallel compile jobs.
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: u32,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            rocm_version: "6.0".to_owned(),
            gpu_architecture: None,
            build_type: BuildType::default(),
            python_version: default_python_version(),
            gpu_count: None,
            cpu_cores: None,
            memory_gb: None,
            cmake_flags: Vec::new(),
            environment: HashMap::new(),
            parallel_jobs: default_parallel_jobs(),
        }
    }
}

impl BuildConfiguration {
    /// Validates the version fields.
    pub fn validate(&self) -> Result<(), Error> {
        let parts: Vec<&str> = self.rocm_version.split('.').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty() || p.parse::<u32>().is_err()) {
            return Err(Error::InvalidRocmVersion {
                version: self.rocm_version.clone(),
            });
        }
        if !SUPPORTED_PYTHON_VERSIONS.contains(&self.python_version.as_str()) {
            return Err(Error::UnsupportedPythonVersion {
                version: self.python_version.clone(),
            });
        }
        Ok(())
    }
}

/// Metadata key marking the one legitimate skeletal request: a `/rebuild`
/// comment whose sha and branch are filled in later by the webhook layer.
pub const TRIGGER_REBUILD_COMMENT: &str = "rebuild_comment";

/// One intent to build a repository at a commit under one or more
/// configurations. Immutable once admitted; the id is unique for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Repository URL or `owner/name`.
    pub repository: String,
    /// Branch name.
    pub branch: String,
    /// Git commit sha, at least 7 hex characters, lowercased.
    pub commit_sha: String,
    /// Pull request number, when PR-triggered.
    #[serde(default)]
    pub pr_number: Option<u64>,
    /// Principal that triggered the build (webhook sender, bot, operator).
    pub triggered_by: String,
    /// Build matrix entries.
    #[serde(default)]
    pub configurations: Vec<BuildConfiguration>,
    /// Priority class; stamped by the scheduler at submit time.
    #[serde(default)]
    pub priority: Priority,
    /// Free-form metadata from the webhook layer (labels, PR flags,
    /// retry bookkeeping).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl BuildRequest {
    /// Creates a request with a fresh id and the current timestamp. The
    /// commit sha is lowercased here so every downstream record sees the
    /// normalized form.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        triggered_by: impl Into<String>,
        configurations: Vec<BuildConfiguration>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository: repository.into(),
            branch: branch.into(),
            commit_sha: commit_sha.into().to_lowercase(),
            pr_number: None,
            triggered_by: triggered_by.into(),
            configurations,
            priority: Priority::default(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// PR labels attached by the webhook layer (`metadata["labels"]`).
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.metadata
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when the PR is marked as a draft.
    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.metadata
            .get("is_draft")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// True when the PR is marked ready for review.
    #[must_use]
    pub fn is_ready_for_review(&self) -> bool {
        self.metadata
            .get("is_ready_for_review")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Number of prior retries of this build.
    #[must_use]
    pub fn retry_count(&self) -> u64 {
        self.metadata
            .get("retry_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    }

    /// True when the request lacks a commit or branch. Only legitimate for
    /// comment-triggered rebuild placeholders.
    #[must_use]
    pub fn is_skeletal(&self) -> bool {
        self.commit_sha.is_empty() || self.branch.is_empty()
    }

    /// Boundary validation: sha shape, configuration presence, skeletal
    /// legitimacy, per-configuration version checks.
    pub fn validate(&self) -> Result<(), Error> {
        if self.is_skeletal() {
            let trigger = self.metadata.get("trigger").and_then(|v| v.as_str());
            if trigger == Some(TRIGGER_REBUILD_COMMENT) {
                return Ok(());
            }
            return Err(Error::SkeletalNotAllowed { request_id: self.id });
        }
        if self.commit_sha.len() < 7 {
            return Err(Error::InvalidCommitSha {
                sha: self.commit_sha.clone(),
                reason: "shorter than 7 characters",
            });
        }
        if !self.commit_sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidCommitSha {
                sha: self.commit_sha.clone(),
                reason: "not hexadecimal",
            });
        }
        if self.configurations.is_empty() {
            return Err(Error::NoConfigurations { request_id: self.id });
        }
        for config in &self.configurations {
            config.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest {
        BuildRequest::new(
            "rocm/pytorch",
            "main",
            "abc1234def",
            "webhook",
            vec![BuildConfiguration::default()],
        )
    }

    #[test]
    fn valid_request_passes() {
        request().validate().expect("valid request");
    }

    #[test]
    fn short_sha_rejected() {
        let mut req = request();
        req.commit_sha = "abc12".to_owned();
        assert!(matches!(
            req.validate(),
            Err(Error::InvalidCommitSha { .. })
        ));
    }

    #[test]
    fn non_hex_sha_rejected() {
        let mut req = request();
        req.commit_sha = "zzz1234".to_owned();
        assert!(matches!(
            req.validate(),
            Err(Error::InvalidCommitSha { .. })
        ));
    }

    #[test]
    fn commit_sha_is_lowercased_at_construction() {
        let req = BuildRequest::new(
            "rocm/pytorch",
            "main",
            "ABC1234DEF",
            "webhook",
            vec![BuildConfiguration::default()],
        );
        assert_eq!(req.commit_sha, "abc1234def");
        req.validate().expect("normalized sha is valid");
    }

    #[test]
    fn empty_configurations_rejected() {
        let mut req = request();
        req.configurations.clear();
        assert!(matches!(req.validate(), Err(Error::NoConfigurations { .. })));
    }

    #[test]
    fn skeletal_only_for_rebuild_comments() {
        let mut req = request();
        req.commit_sha = String::new();
        assert!(matches!(
            req.validate(),
            Err(Error::SkeletalNotAllowed { .. })
        ));

        req.metadata.insert(
            "trigger".to_owned(),
            serde_json::Value::String(TRIGGER_REBUILD_COMMENT.to_owned()),
        );
        req.validate().expect("rebuild placeholder allowed");
    }

    #[test]
    fn metadata_accessors() {
        let mut req = request();
        req.metadata.insert(
            "labels".to_owned(),
            serde_json::json!(["ci:urgent", "area/kernels"]),
        );
        req.metadata
            .insert("is_draft".to_owned(), serde_json::Value::Bool(true));
        req.metadata
            .insert("retry_count".to_owned(), serde_json::json!(2));

        assert_eq!(req.labels(), vec!["ci:urgent", "area/kernels"]);
        assert!(req.is_draft());
        assert!(!req.is_ready_for_review());
        assert_eq!(req.retry_count(), 2);
    }

    #[test]
    fn bad_rocm_version_rejected() {
        let mut config = BuildConfiguration::default();
        config.rocm_version = "6".to_owned();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidRocmVersion { .. })
        ));
    }
}
