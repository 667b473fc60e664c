//! Config schema types (server, sync, probe, driver families, metrics).

use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    volbroker_common::BackoffConfig,
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Unmount every volume reported by the discovered plugins at startup.
    pub purge_on_start: bool,
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub probe: ProbeConfig,
    pub docker: DockerConfig,
    pub csi: CsiConfig,
    pub metrics: MetricsConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            purge_on_start: true,
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            probe: ProbeConfig::default(),
            docker: DockerConfig::default(),
            csi: CsiConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// HTTP front end listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8750,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between the end of one discovery cycle and the start of the next.
    pub interval_secs: u64,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// Retry schedule for reaching a plugin during probes and RPCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    /// Zero retries forever.
    pub max_elapsed_ms: u64,
}

impl ProbeConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            multiplier: self.multiplier,
            max_elapsed: Duration::from_millis(self.max_elapsed_ms),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_elapsed_ms: 30_000,
        }
    }
}

/// Docker volume driver plugins (HTTP, JSON bodies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub enabled: bool,
    /// Searched in order; the first directory holding a driver wins.
    pub spec_paths: Vec<PathBuf>,
    pub required_capability: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spec_paths: vec![
                PathBuf::from("/run/docker/plugins"),
                PathBuf::from("/etc/docker/plugins"),
                PathBuf::from("/usr/lib/docker/plugins"),
            ],
            required_capability: "VolumeDriver".into(),
        }
    }
}

/// CSI node plugins (gRPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsiConfig {
    pub enabled: bool,
    pub spec_paths: Vec<PathBuf>,
    /// `major.minor.patch` the plugin must list among its supported versions.
    pub required_version: String,
    /// Volumes are published under `<mounts_root>/<driver>/<volume>`.
    pub mounts_root: PathBuf,
}

impl Default for CsiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spec_paths: Vec::new(),
            required_version: "0.1.0".into(),
            mounts_root: PathBuf::from("/var/vcap/data/volumes/csi"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}
