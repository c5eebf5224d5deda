// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The pure scoring policy.
//!
//! Scoring starts from a base of 50 and adds branch, label, PR-state and
//! triggerer signals. Branch deltas stack (a branch can be both protected
//! and release-prefixed); of the label deltas only the largest applies.
//! Classification buckets the score; the comparator orders by score then
//! submission time.

use rocforge_model::{BuildRequest, Priority};
use serde::Serialize;
use std::cmp::Ordering;

/// Branches that always build at elevated priority.
const PROTECTED_BRANCHES: [&str; 4] = ["main", "master", "develop", "release"];
/// Prefixes marking hotfix branches.
const HOTFIX_PREFIXES: [&str; 3] = ["hotfix/", "hotfix-", "fix/"];
/// Prefixes marking release branches.
const RELEASE_PREFIXES: [&str; 3] = ["release/", "release-", "v"];

/// Label substrings and their boosts. Only the best match applies.
const LABEL_BOOSTS: [(&str, i64); 4] = [
    ("critical", 100),
    ("urgent", 80),
    ("high-priority", 60),
    ("quick-test", 40),
];

const BASE_SCORE: i64 = 50;
const PROTECTED_BRANCH_DELTA: i64 = 100;
const RELEASE_BRANCH_DELTA: i64 = 80;
const HOTFIX_BRANCH_DELTA: i64 = 90;
const READY_FOR_REVIEW_DELTA: i64 = 30;
const DRAFT_DELTA: i64 = -20;
const BOT_DELTA: i64 = -10;
const RETRY_DELTA: i64 = -5;

fn is_protected_branch(branch: &str) -> bool {
    PROTECTED_BRANCHES.contains(&branch)
}

fn is_release_branch(branch: &str) -> bool {
    RELEASE_PREFIXES.iter().any(|p| branch.starts_with(p))
}

fn is_hotfix_branch(branch: &str) -> bool {
    HOTFIX_PREFIXES.iter().any(|p| branch.starts_with(p))
}

fn is_bot_triggered(request: &BuildRequest) -> bool {
    let triggered_by = request.triggered_by.to_lowercase();
    triggered_by.contains("dependabot") || triggered_by.contains("renovate")
}

fn label_boost(request: &BuildRequest) -> i64 {
    let mut best = 0;
    for label in request.labels() {
        let label = label.to_lowercase();
        for (needle, boost) in LABEL_BOOSTS {
            if label.contains(needle) {
                best = best.max(boost);
            }
        }
    }
    best
}

/// Computes the raw priority score for a request.
#[must_use]
pub fn score(request: &BuildRequest) -> i64 {
    let mut score = BASE_SCORE;

    if is_protected_branch(&request.branch) {
        score += PROTECTED_BRANCH_DELTA;
    }
    if is_release_branch(&request.branch) {
        score += RELEASE_BRANCH_DELTA;
    }
    if is_hotfix_branch(&request.branch) {
        score += HOTFIX_BRANCH_DELTA;
    }

    score += label_boost(request);

    if request.is_ready_for_review() {
        score += READY_FOR_REVIEW_DELTA;
    }
    if request.is_draft() {
        score += DRAFT_DELTA;
    }
    if is_bot_triggered(request) {
        score += BOT_DELTA;
    }

    let retries = i64::try_from(request.retry_count()).unwrap_or(i64::MAX);
    score.saturating_add(RETRY_DELTA.saturating_mul(retries))
}

/// Buckets a request's score into a priority class.
#[must_use]
pub fn classify(request: &BuildRequest) -> Priority {
    let score = score(request);
    if score >= 150 {
        Priority::Critical
    } else if score >= 80 {
        Priority::High
    } else if score >= 20 {
        Priority::Normal
    } else {
        Priority::Low
    }
}

/// Orders two requests for dispatch: higher score first, ties broken by
/// earlier submission, stable otherwise.
#[must_use]
pub fn compare(a: &BuildRequest, b: &BuildRequest) -> Ordering {
    score(b)
        .cmp(&score(a))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Whether a newly-arrived request justifies preempting a running one.
///
/// Advisory only: the coordinator currently never acts on it, but the
/// predicate is part of the scheduling contract.
#[must_use]
pub fn should_preempt(new: &BuildRequest, running: &BuildRequest) -> bool {
    let new_class = classify(new);
    if new_class != Priority::Critical {
        return false;
    }
    if running.priority != Priority::Critical {
        return true;
    }
    is_hotfix_branch(&new.branch)
}

/// One contributing factor in a priority explanation.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityFactor {
    /// Stable factor name.
    pub factor: &'static str,
    /// Human-readable description.
    pub description: String,
    /// Signed score contribution.
    pub delta: i64,
}

/// Why a request landed in its priority class. Surfaced by the status
/// façade so submitters can see what moved their build.
#[derive(Debug, Clone, Serialize)]
pub struct PriorityExplanation {
    /// The resulting class.
    pub priority: Priority,
    /// The total score.
    pub total_score: i64,
    /// The base every request starts from.
    pub base_score: i64,
    /// Every factor that contributed.
    pub factors: Vec<PriorityFactor>,
}

/// Breaks a request's score down factor by factor.
#[must_use]
pub fn explain(request: &BuildRequest) -> PriorityExplanation {
    let mut factors = Vec::new();

    if is_protected_branch(&request.branch) {
        factors.push(PriorityFactor {
            factor: "protected_branch",
            description: format!("branch `{}` is a protected branch", request.branch),
            delta: PROTECTED_BRANCH_DELTA,
        });
    }
    if is_release_branch(&request.branch) {
        factors.push(PriorityFactor {
            factor: "release_branch",
            description: format!("branch `{}` is a release branch", request.branch),
            delta: RELEASE_BRANCH_DELTA,
        });
    }
    if is_hotfix_branch(&request.branch) {
        factors.push(PriorityFactor {
            factor: "hotfix_branch",
            description: format!("branch `{}` is a hotfix branch", request.branch),
            delta: HOTFIX_BRANCH_DELTA,
        });
    }
    let boost = label_boost(request);
    if boost > 0 {
        factors.push(PriorityFactor {
            factor: "priority_labels",
            description: format!("labels {:?} carry a priority boost", request.labels()),
            delta: boost,
        });
    }
    if request.is_ready_for_review() {
        factors.push(PriorityFactor {
            factor: "ready_for_review",
            description: "pull request is marked ready for review".to_owned(),
            delta: READY_FOR_REVIEW_DELTA,
        });
    }
    if request.is_draft() {
        factors.push(PriorityFactor {
            factor: "draft",
            description: "pull request is a draft".to_owned(),
            delta: DRAFT_DELTA,
        });
    }
    if is_bot_triggered(request) {
        factors.push(PriorityFactor {
            factor: "bot_triggered",
            description: format!("triggered by `{}`", request.triggered_by),
            delta: BOT_DELTA,
        });
    }
    let retries = request.retry_count();
    if retries > 0 {
        factors.push(PriorityFactor {
            factor: "retries",
            description: format!("{retries} prior retries"),
            delta: RETRY_DELTA * i64::try_from(retries).unwrap_or(0),
        });
    }

    PriorityExplanation {
        priority: classify(request),
        total_score: score(request),
        base_score: BASE_SCORE,
        factors,
    }
}
