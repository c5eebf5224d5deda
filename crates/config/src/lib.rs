// Copyright The rocforge Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the rocforge control plane.
//!
//! The settings tree mirrors the component layout: one section per
//! component plus the static fleet/worker descriptions the binary wires at
//! startup. Files are YAML or JSON, dispatched by extension; durations use
//! the humantime syntax ("30s", "7d").

use rocforge_model::GpuArchitecture;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error types for settings loading and validation.
pub mod error;

pub use error::Error;

fn default_max_queue_size() -> usize {
    1000
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_state_ttl() -> Duration {
    // 7 days
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_gpus() -> u32 {
    1
}

fn default_cpu_cores() -> u32 {
    8
}

fn default_memory_gb() -> f64 {
    32.0
}

fn default_worker_weight() -> u32 {
    1
}

fn default_worker_max_load() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_owned()
}

/// Worker selection strategy, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategyKind {
    /// Circular order over eligible workers.
    RoundRobin,
    /// Worker with the fewest in-flight jobs (default).
    #[default]
    LeastConnections,
    /// Probability proportional to `weight × available_capacity`.
    WeightedRoundRobin,
    /// Uniform over eligible workers.
    Random,
    /// Scored blend of load, capacity and historical build speed.
    ResourceAware,
}

/// Admission queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Bound on concurrently queued items.
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: default_max_queue_size(),
        }
    }
}

/// Load balancer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerSettings {
    /// Worker selection strategy.
    #[serde(default)]
    pub strategy: SelectionStrategyKind,
    /// Period of the background health probe loop.
    #[serde(with = "humantime_serde", default = "default_health_interval")]
    pub health_interval: Duration,
    /// Per-probe timeout.
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategyKind::default(),
            health_interval: default_health_interval(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// Coordinator loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Dispatcher sleep between poll iterations. Part of the contract: the
    /// loop trades up to this much latency for back-off simplicity.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// How long `stop()` waits for in-flight builds before checkpointing
    /// them as interrupted.
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Build state persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    /// Key-value backend URL (`file:///var/lib/rocforge`). Absent means
    /// purely in-memory state.
    #[serde(default)]
    pub persistence_url: Option<String>,
    /// Per-record expiry in the persistent backend.
    #[serde(with = "humantime_serde", default = "default_state_ttl")]
    pub ttl: Duration,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            persistence_url: None,
            ttl: default_state_ttl(),
        }
    }
}

/// Resource allocator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSettings {
    /// GPUs reserved when a configuration does not say.
    #[serde(default = "default_gpus")]
    pub default_gpus: u32,
    /// CPU cores reserved when a configuration does not say.
    #[serde(default = "default_cpu_cores")]
    pub default_cpu_cores: u32,
    /// Memory (GB) reserved when a configuration does not say.
    #[serde(default = "default_memory_gb")]
    pub default_memory_gb: f64,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            default_gpus: default_gpus(),
            default_cpu_cores: default_cpu_cores(),
            default_memory_gb: default_memory_gb(),
        }
    }
}

/// A statically-declared build node. When the `fleet` list is present the
/// allocator uses it verbatim instead of introspecting the local host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node name, unique within the fleet.
    pub name: String,
    /// GPU count on the node.
    pub gpus: u32,
    /// Architecture of the node's GPUs (homogeneous per node).
    pub gpu_architecture: GpuArchitecture,
    /// Total CPU cores.
    pub cpu_cores: u32,
    /// Total memory in GB.
    pub memory_gb: f64,
}

/// A worker registered with the load balancer at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEntry {
    /// Worker id, unique within the registry.
    pub id: String,
    /// Dispatch address, `host:port`.
    pub address: String,
    /// Relative weight for the weighted strategy.
    #[serde(default = "default_worker_weight")]
    pub weight: u32,
    /// Maximum concurrent builds.
    #[serde(default = "default_worker_max_load")]
    pub max_load: u32,
}

/// Root of the settings tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default log level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Admission queue section.
    #[serde(default)]
    pub queue: QueueSettings,
    /// Load balancer section.
    #[serde(default)]
    pub balancer: BalancerSettings,
    /// Coordinator section.
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    /// State persistence section.
    #[serde(default)]
    pub state: StateSettings,
    /// Resource allocator section.
    #[serde(default)]
    pub allocator: AllocatorSettings,
    /// Static build fleet; absent means local-host introspection.
    #[serde(default)]
    pub fleet: Option<Vec<NodeEntry>>,
    /// Workers to register at startup.
    #[serde(default)]
    pub workers: Vec<WorkerEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queue: QueueSettings::default(),
            balancer: BalancerSettings::default(),
            coordinator: CoordinatorSettings::default(),
            state: StateSettings::default(),
            allocator: AllocatorSettings::default(),
            fleet: None,
            workers: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from a YAML or JSON file, dispatching on extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let settings: Self = match extension {
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| Error::DeserializationError {
                    path: path.to_path_buf(),
                    format: "YAML",
                    details: e.to_string(),
                })?
            }
            "json" => serde_json::from_str(&contents).map_err(|e| Error::DeserializationError {
                path: path.to_path_buf(),
                format: "JSON",
                details: e.to_string(),
            })?,
            _ => {
                return Err(Error::UnsupportedExtension {
                    path: path.to_path_buf(),
                });
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validates cross-field constraints the serde layer cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queue.max_size == 0 {
            return Err(Error::InvalidSetting {
                key: "queue.max_size",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.balancer.health_interval.is_zero() {
            return Err(Error::InvalidSetting {
                key: "balancer.health_interval",
                reason: "must be non-zero".to_owned(),
            });
        }
        if self.coordinator.poll_interval.is_zero() {
            return Err(Error::InvalidSetting {
                key: "coordinator.poll_interval",
                reason: "must be non-zero".to_owned(),
            });
        }
        if self.allocator.default_gpus == 0 {
            return Err(Error::InvalidSetting {
                key: "allocator.default_gpus",
                reason: "must be at least 1".to_owned(),
            });
        }
        if let Some(url) = &self.state.persistence_url {
            if !url.starts_with("file://") {
                return Err(Error::UnsupportedPersistenceScheme { url: url.clone() });
            }
        }
        for worker in &self.workers {
            if worker.max_load == 0 {
                return Err(Error::InvalidSetting {
                    key: "workers.max_load",
                    reason: format!("worker `{}` has max_load 0", worker.id),
                });
            }
        }
        if let Some(fleet) = &self.fleet {
            for node in fleet {
                if node.cpu_cores == 0 {
                    return Err(Error::InvalidSetting {
                        key: "fleet.cpu_cores",
                        reason: format!("node `{}` has no CPU cores", node.name),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    #[test]
    fn defaults_match_contract() {
        let settings = Settings::default();
        assert_eq!(settings.queue.max_size, 1000);
        assert_eq!(
            settings.balancer.strategy,
            SelectionStrategyKind::LeastConnections
        );
        assert_eq!(settings.balancer.health_interval, Duration::from_secs(30));
        assert_eq!(settings.balancer.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.coordinator.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.state.ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(settings.allocator.default_cpu_cores, 8);
        assert_eq!(settings.allocator.default_memory_gb, 32.0);
        assert!(settings.state.persistence_url.is_none());
    }

    #[test]
    fn loads_yaml_with_humantime_durations() {
        let yaml = r#"
log_level: debug
queue:
  max_size: 50
balancer:
  strategy: resource_aware
  health_interval: 10s
coordinator:
  poll_interval: 250ms
state:
  persistence_url: file:///tmp/rocforge-state
  ttl: 2d
workers:
  - id: worker-a
    address: 10.0.0.5:9090
    max_load: 3
"#;
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("tempfile");
        file.write_all(yaml.as_bytes()).expect("write");

        let settings = Settings::from_file(file.path()).expect("load");
        assert_eq!(settings.queue.max_size, 50);
        assert_eq!(
            settings.balancer.strategy,
            SelectionStrategyKind::ResourceAware
        );
        assert_eq!(settings.balancer.health_interval, Duration::from_secs(10));
        assert_eq!(
            settings.coordinator.poll_interval,
            Duration::from_millis(250)
        );
        assert_eq!(settings.state.ttl, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(settings.workers.len(), 1);
        assert_eq!(settings.workers[0].max_load, 3);
    }

    #[test]
    fn zero_queue_size_rejected() {
        let settings = Settings {
            queue: QueueSettings { max_size: 0 },
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSetting { key, .. }) if key == "queue.max_size"
        ));
    }

    #[test]
    fn unknown_persistence_scheme_rejected() {
        let settings = Settings {
            state: StateSettings {
                persistence_url: Some("redis://localhost:6379/0".to_owned()),
                ttl: default_state_ttl(),
            },
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::UnsupportedPersistenceScheme { .. })
        ));
    }

    #[test]
    fn unknown_extension_rejected() {
        let file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(Error::UnsupportedExtension { .. })
        ));
    }
}
