// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! The state manager and its records.
//!
//! Writes mutate the in-memory maps under the lock, then mirror to the
//! store (when configured) after the lock is released. Persistence is
//! best-effort: failures are logged and the in-memory view stays
//! authoritative.

use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use rocforge_model::{BuildRequest, BuildStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

fn state_key(id: Uuid) -> String {
    format!("build:state:{id}")
}

fn request_key(id: Uuid) -> String {
    format!("build:request:{id}")
}

fn checkpoint_key(id: Uuid) -> String {
    format!("build:checkpoint:{id}")
}

/// Everything the façade knows about one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStateRecord {
    /// Current status.
    pub status: BuildStatus,
    /// Repository under build.
    pub repository: String,
    /// Branch under build.
    pub branch: String,
    /// Commit under build.
    pub commit_sha: String,
    /// Pull request number, when PR-triggered.
    #[serde(default)]
    pub pr_number: Option<u64>,
    /// When the request was admitted.
    pub created_at: DateTime<Utc>,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
    /// When the dispatcher started the build.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the build reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail, when failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Principal that cancelled the build, when cancelled.
    #[serde(default)]
    pub cancelled_by: Option<String>,
    /// Stated reason for cancellation.
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// Wall-clock duration in seconds, when complete.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Free-form extension fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BuildStateRecord {
    fn for_request(request: &BuildRequest) -> Self {
        Self {
            status: BuildStatus::Pending,
            repository: request.repository.clone(),
            branch: request.branch.clone(),
            commit_sha: request.commit_sha.clone(),
            pr_number: request.pr_number,
            created_at: request.created_at,
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            cancelled_by: None,
            cancel_reason: None,
            duration_seconds: None,
            extra: HashMap::new(),
        }
    }
}

/// Typed payload accompanying a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// Stamp the dispatch start.
    pub started_at: Option<DateTime<Utc>>,
    /// Failure detail.
    pub error: Option<String>,
    /// Principal that cancelled the build.
    pub cancelled_by: Option<String>,
    /// Stated reason for cancellation.
    pub cancel_reason: Option<String>,
    /// Wall-clock duration in seconds.
    pub duration_seconds: Option<f64>,
    /// Free-form extension fields, merged into the record.
    pub extra: HashMap<String, serde_json::Value>,
}

/// One named waypoint recorded during a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stage name (`"fetch"`, `"compile"`, `"interrupted"`, …).
    pub stage: String,
    /// When the stage was recorded.
    pub timestamp: DateTime<Utc>,
    /// Opaque stage data.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Append-only checkpoint log with an O(1) latest-stage pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CheckpointLog {
    checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    latest_stage: Option<String>,
}

#[derive(Default)]
struct StateInner {
    states: HashMap<Uuid, BuildStateRecord>,
    requests: HashMap<Uuid, BuildRequest>,
    checkpoints: HashMap<Uuid, CheckpointLog>,
}

/// Build state and checkpoint store with optional persistence.
pub struct StateManager {
    inner: Mutex<StateInner>,
    store: Option<Arc<dyn KeyValueStore>>,
    ttl: Duration,
}

impl StateManager {
    /// Creates a manager. With no store, state is purely in-memory and a
    /// restart forgets everything.
    #[must_use]
    pub fn new(store: Option<Arc<dyn KeyValueStore>>, ttl: Duration) -> Self {
        if store.is_some() {
            info!(ttl = ?ttl, "state manager persisting to key-value store");
        } else {
            info!("state manager running in-memory only");
        }
        Self {
            inner: Mutex::new(StateInner::default()),
            store,
            ttl,
        }
    }

    async fn mirror(&self, key: String, value: String) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.put(&key, value, Some(self.ttl)).await {
            error!(key, error = %err, "persistence write failed, in-memory state remains authoritative");
        }
    }

    /// Records a freshly-admitted request with a `Pending` state row.
    pub async fn save_request(&self, request: &BuildRequest) {
        let record = BuildStateRecord::for_request(request);
        let id = request.id;
        {
            let mut inner = self.inner.lock().await;
            let _previous = inner.requests.insert(id, request.clone());
            let _previous = inner.states.insert(id, record.clone());
        }

        match (
            serde_json::to_string(&record),
            serde_json::to_string(request),
        ) {
            (Ok(state_json), Ok(request_json)) => {
                self.mirror(state_key(id), state_json).await;
                self.mirror(request_key(id), request_json).await;
            }
            _ => error!(build_id = %id, "failed to serialize state for persistence"),
        }
        debug!(build_id = %id, "saved build request");
    }

    /// Loads a request, falling back to the store for builds admitted
    /// before the last restart.
    pub async fn get_request(&self, id: Uuid) -> Option<BuildRequest> {
        if let Some(request) = self.inner.lock().await.requests.get(&id) {
            return Some(request.clone());
        }
        let store = self.store.as_ref()?;
        match store.get(&request_key(id)).await {
            Ok(Some(json)) => serde_json::from_str(&json)
                .map_err(|err| error!(build_id = %id, error = %err, "corrupt persisted request"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                error!(build_id = %id, error = %err, "persistence read failed");
                None
            }
        }
    }

    /// Loads a state record, falling back to the store.
    pub async fn get_state(&self, id: Uuid) -> Option<BuildStateRecord> {
        if let Some(record) = self.inner.lock().await.states.get(&id) {
            return Some(record.clone());
        }
        let store = self.store.as_ref()?;
        match store.get(&state_key(id)).await {
            Ok(Some(json)) => serde_json::from_str(&json)
                .map_err(|err| error!(build_id = %id, error = %err, "corrupt persisted state"))
                .ok(),
            Ok(None) => None,
            Err(err) => {
                error!(build_id = %id, error = %err, "persistence read failed");
                None
            }
        }
    }

    /// Applies a status transition.
    ///
    /// The lifecycle contract is monotonic (`Pending→Running→terminal`);
    /// the caller owns correctness, so a regression is applied anyway but
    /// logged as an anomaly. Terminal transitions stamp `completed_at`.
    pub async fn update_status(&self, id: Uuid, status: BuildStatus, update: StatusUpdate) {
        let record = {
            let mut inner = self.inner.lock().await;
            let record = inner.states.entry(id).or_insert_with(|| {
                warn!(build_id = %id, "status update for unknown build, creating bare record");
                BuildStateRecord {
                    status: BuildStatus::Pending,
                    repository: String::new(),
                    branch: String::new(),
                    commit_sha: String::new(),
                    pr_number: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    started_at: None,
                    completed_at: None,
                    error: None,
                    cancelled_by: None,
                    cancel_reason: None,
                    duration_seconds: None,
                    extra: HashMap::new(),
                }
            });

            if status.rank() < record.status.rank() {
                warn!(
                    build_id = %id,
                    from = %record.status,
                    to = %status,
                    "status regression applied; lifecycle contract expects monotonic transitions"
                );
            }

            record.status = status;
            record.updated_at = Utc::now();
            if let Some(started_at) = update.started_at {
                record.started_at = Some(started_at);
            }
            if let Some(error) = update.error {
                record.error = Some(error);
            }
            if let Some(cancelled_by) = update.cancelled_by {
                record.cancelled_by = Some(cancelled_by);
            }
            if let Some(reason) = update.cancel_reason {
                record.cancel_reason = Some(reason);
            }
            if let Some(duration) = update.duration_seconds {
                record.duration_seconds = Some(duration);
            }
            record.extra.extend(update.extra);
            if status.is_terminal() {
                record.completed_at = Some(Utc::now());
            }
            record.clone()
        };

        if let Ok(json) = serde_json::to_string(&record) {
            self.mirror(state_key(id), json).await;
        }
        debug!(build_id = %id, status = %status, "updated build status");
    }

    /// Appends a checkpoint and moves the latest-stage pointer.
    pub async fn checkpoint(&self, id: Uuid, stage: impl Into<String>, data: serde_json::Value) {
        let stage = stage.into();
        let log = {
            let mut inner = self.inner.lock().await;
            let log = inner.checkpoints.entry(id).or_default();
            log.checkpoints.push(Checkpoint {
                stage: stage.clone(),
                timestamp: Utc::now(),
                data,
            });
            log.latest_stage = Some(stage.clone());
            log.clone()
        };

        if let Ok(json) = serde_json::to_string(&log) {
            self.mirror(checkpoint_key(id), json).await;
        }
        debug!(build_id = %id, stage = %stage, "checkpointed build");
    }

    /// The most recent checkpoint, via the O(1) latest-stage pointer.
    pub async fn latest_checkpoint(&self, id: Uuid) -> Option<Checkpoint> {
        {
            let inner = self.inner.lock().await;
            if let Some(log) = inner.checkpoints.get(&id) {
                return log.checkpoints.last().cloned();
            }
        }
        let store = self.store.as_ref()?;
        match store.get(&checkpoint_key(id)).await {
            Ok(Some(json)) => serde_json::from_str::<CheckpointLog>(&json)
                .ok()
                .and_then(|log| log.checkpoints.last().cloned()),
            Ok(None) => None,
            Err(err) => {
                error!(build_id = %id, error = %err, "persistence read failed");
                None
            }
        }
    }

    /// Name of the most recent stage without touching the full log.
    pub async fn latest_stage(&self, id: Uuid) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.checkpoints.get(&id)?.latest_stage.clone()
    }

    /// Forgets a build entirely, in memory and in the store.
    pub async fn delete(&self, id: Uuid) {
        {
            let mut inner = self.inner.lock().await;
            let _state = inner.states.remove(&id);
            let _request = inner.requests.remove(&id);
            let _checkpoints = inner.checkpoints.remove(&id);
        }
        if let Some(store) = &self.store {
            for key in [state_key(id), request_key(id), checkpoint_key(id)] {
                if let Err(err) = store.delete(&key).await {
                    error!(key, error = %err, "persistence delete failed");
                }
            }
        }
        debug!(build_id = %id, "deleted build state");
    }

    /// All builds currently `Pending` or `Running`.
    pub async fn all_active(&self) -> HashMap<Uuid, BuildStateRecord> {
        let inner = self.inner.lock().await;
        inner
            .states
            .iter()
            .filter(|(_, record)| {
                matches!(record.status, BuildStatus::Pending | BuildStatus::Running)
            })
            .map(|(id, record)| (*id, record.clone()))
            .collect()
    }

    /// Restart recovery: scans the store for `Pending`/`Running` builds,
    /// loads their requests, and merges in the in-memory actives. A read
    /// failure logs and continues with whatever could be read.
    pub async fn restore_pending(&self) -> Vec<BuildRequest> {
        let mut restored: Vec<BuildRequest> = Vec::new();

        if let Some(store) = &self.store {
            match store.scan("build:state:").await {
                Ok(keys) => {
                    for key in keys {
                        let Some(id) = key
                            .strip_prefix("build:state:")
                            .and_then(|raw| Uuid::parse_str(raw).ok())
                        else {
                            warn!(key, "skipping malformed state key");
                            continue;
                        };
                        let record = match store.get(&key).await {
                            Ok(Some(json)) => {
                                match serde_json::from_str::<BuildStateRecord>(&json) {
                                    Ok(record) => record,
                                    Err(err) => {
                                        error!(build_id = %id, error = %err, "corrupt persisted state, skipping");
                                        continue;
                                    }
                                }
                            }
                            Ok(None) => continue,
                            Err(err) => {
                                error!(build_id = %id, error = %err, "persistence read failed, skipping");
                                continue;
                            }
                        };
                        if !matches!(
                            record.status,
                            BuildStatus::Pending | BuildStatus::Running
                        ) {
                            continue;
                        }
                        if let Some(request) = self.get_request(id).await {
                            restored.push(request);
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "state scan failed, continuing with in-memory state only");
                }
            }
        }

        {
            let inner = self.inner.lock().await;
            for (id, record) in &inner.states {
                let active = matches!(
                    record.status,
                    BuildStatus::Pending | BuildStatus::Running
                );
                if active && !restored.iter().any(|r| r.id == *id) {
                    if let Some(request) = inner.requests.get(id) {
                        restored.push(request.clone());
                    }
                }
            }
        }

        info!(count = restored.len(), "restored pending builds");
        restored
    }

    /// Writes an arbitrary value under `state:{key}`. A generic escape
    /// hatch for collaborators that need durable scratch state.
    pub async fn save_raw(&self, key: &str, value: &serde_json::Value) {
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        self.mirror(format!("state:{key}"), json).await;
    }

    /// Reads a value written by [`Self::save_raw`].
    pub async fn load_raw(&self, key: &str) -> Option<serde_json::Value> {
        let store = self.store.as_ref()?;
        match store.get(&format!("state:{key}")).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(err) => {
                error!(key, error = %err, "persistence read failed");
                None
            }
        }
    }
}
