// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Key-value persistence backends.
//!
//! The store is a deliberately small surface: string keys, string values,
//! optional expiry, prefix scan. `MemoryStore` backs the no-persistence
//! configuration; `FileStore` keeps one JSON envelope per key under a
//! directory and is selected by `file://` URLs.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// A key-value store with optional per-record expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value. Expired records read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Writes a value, optionally expiring after `ttl`.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), Error>;

    /// Deletes a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Lists the live keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

fn expiry_from_ttl(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| {
        ChronoDuration::from_std(ttl)
            .ok()
            .map(|ttl| Utc::now() + ttl)
    })
}

fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| at <= Utc::now())
}

/// In-memory store with lazy expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<DateTime<Utc>>)>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if is_expired(*expires_at) => {
                let _expired = entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        let _previous = entries.insert(key.to_owned(), (value, expiry_from_ttl(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let _removed = self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, (_, expires_at))| {
                key.starts_with(prefix) && !is_expired(*expires_at)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// On-disk envelope: the value plus its expiry.
#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    value: String,
}

/// One JSON file per key under a root directory. Keys are percent-encoded
/// into file names, so arbitrary key characters are safe.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens a store from a `file://` URL.
    pub fn from_url(url: &str) -> Result<Self, Error> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| Error::InvalidUrl {
                url: url.to_owned(),
                reason: "expected a file:// URL",
            })?;
        if path.is_empty() {
            return Err(Error::InvalidUrl {
                url: url.to_owned(),
                reason: "empty path",
            });
        }
        Self::new(path)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", urlencoding::encode(key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.path_for(key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let envelope: Envelope = serde_json::from_str(&contents)?;
        if is_expired(envelope.expires_at) {
            debug!(key, "dropping expired record");
            let _removed = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), Error> {
        let envelope = Envelope {
            expires_at: expiry_from_ttl(ttl),
            value,
        };
        let contents = serde_json::to_string(&envelope)?;
        tokio::fs::write(self.path_for(key), contents).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(key) = urlencoding::decode(encoded) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            // Only live keys: an expired record that has not been purged
            // yet must not be listed.
            let Ok(contents) = tokio::fs::read_to_string(entry.path()).await else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<Envelope>(&contents) else {
                continue;
            };
            if is_expired(envelope.expires_at) {
                debug!(key = %key, "dropping expired record");
                let _removed = tokio::fs::remove_file(entry.path()).await;
                continue;
            }
            keys.push(key.into_owned());
        }
        Ok(keys)
    }
}
