//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Shared primitives and utilities for the control plane."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_storage_path() -> PathBuf {
    PathBuf::from("target/faultline.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_resource_ttl() -> Duration {
    // Twice the poll interval so a healthy poller always refreshes a
    // live fault before the discovery server starts heartbeating it.
    Duration::from_secs(20)
}

fn default_runtime_layer_name() -> String {
    "faultline.experiments".to_owned()
}

fn default_ecds_resource_name() -> String {
    "envoy.extension_config".to_owned()
}

fn default_monitor_enabled() -> bool {
    true
}

fn default_outer_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the Faultline control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "FAULTLINE_CONFIG";

    /// Load configuration from disk, respecting the `FAULTLINE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path.to_path_buf())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
            debug!(path = %path.display(), "configuration candidate not present");
        }

        Err(anyhow!(
            "no configuration file found (set {} or pass --config)",
            Self::ENV_CONFIG_PATH
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation applied after deserialization.
    pub fn validate(&self) -> Result<()> {
        if self.poller.interval.is_zero() {
            return Err(anyhow!("poller.interval must be greater than zero"));
        }
        if self.monitor.enabled {
            if self.monitor.outer_interval.is_zero() {
                return Err(anyhow!("monitor.outer_interval must be greater than zero"));
            }
            if self.monitor.check_interval.is_zero() {
                return Err(anyhow!("monitor.check_interval must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Storage backend location for the experiment store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Settings driving the resource poller reconciliation loop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    /// Interval between reconciliation ticks.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_poll_interval")]
    pub interval: Duration,
    /// TTL attached to non-empty resources so proxies detect a dead
    /// control plane.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_resource_ttl")]
    pub resource_ttl: Duration,
    /// Name of the runtime layer delivered over RTDS.
    #[serde(default = "default_runtime_layer_name")]
    pub runtime_layer_name: String,
    /// Clusters served full extension configs over ECDS instead of
    /// runtime overrides.
    #[serde(default)]
    pub ecds_clusters: Vec<String>,
    /// Resource name used for ECDS pushes when a cluster has never
    /// requested one explicitly.
    #[serde(default = "default_ecds_resource_name")]
    pub ecds_resource_name: String,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            resource_ttl: default_resource_ttl(),
            runtime_layer_name: default_runtime_layer_name(),
            ecds_clusters: Vec::new(),
            ecds_resource_name: default_ecds_resource_name(),
        }
    }
}

/// Settings driving the termination monitor.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
    /// Interval at which each outer loop re-lists active experiments.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_outer_interval")]
    pub outer_interval: Duration,
    /// Interval at which each per-experiment watcher evaluates its
    /// criteria.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,
    /// Config types the monitor watches, each with its criterion set.
    #[serde(default)]
    pub watched: Vec<WatchedConfigType>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            outer_interval: default_outer_interval(),
            check_interval: default_check_interval(),
            watched: Vec::new(),
        }
    }
}

/// One watched experiment config type and its termination criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedConfigType {
    pub config_type: String,
    #[serde(default)]
    pub criteria: Vec<CriterionSettings>,
}

/// Declarative criterion reference resolved through the factory
/// registry at monitor construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSettings {
    pub kind: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
