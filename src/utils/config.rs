// src/utils/config.rs
//! Layered fleet configuration
//!
//! Values are resolved in order, later sources winning:
//!
//! 1. Built-in defaults ([`FleetConfig::default`])
//! 2. An optional config file (TOML, YAML or JSON, picked by extension)
//! 3. `FLEET_*` environment variables, `__` separating nested keys
//!    (e.g. `FLEET_CONTROL_PLANE__BASE_URL`)

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Control-plane API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the REST API, without trailing slash
    pub base_url: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
        }
    }
}

/// Queue broker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base URL of the pull-subscription endpoint
    pub broker_url: String,

    /// Delay between empty pulls
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url: "http://127.0.0.1:8085/v1".to_string(),
            poll_interval_ms: 1_000,
        }
    }
}

/// Container execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Docker CLI binary, resolved through `PATH` when not absolute
    pub docker_binary: String,

    /// Port every job container serves its HTTP endpoint on
    pub port: u16,

    /// Upper bound on the container request; `None` waits forever
    pub dispatch_timeout_secs: Option<u64>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            port: 8000,
            dispatch_timeout_secs: None,
        }
    }
}

/// Per-worker loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLoopConfig {
    /// Re-registration period while listening; 0 disables the heartbeat
    pub heartbeat_interval_secs: u64,

    /// How long the pool waits for workers after SIGTERM before killing them
    pub shutdown_grace_secs: u64,
}

impl Default for WorkerLoopConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Prometheus listen address for the pool process
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

/// Top-level fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Number of worker processes the pool runs
    pub thread_count: usize,

    /// Directory holding identities and credential files
    pub state_dir: PathBuf,

    pub control_plane: ControlPlaneConfig,
    pub queue: QueueConfig,
    pub container: ContainerConfig,
    pub worker: WorkerLoopConfig,
    pub observability: ObservabilityConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            thread_count: 1,
            state_dir: PathBuf::from(".fleet-worker"),
            control_plane: ControlPlaneConfig::default(),
            queue: QueueConfig::default(),
            container: ContainerConfig::default(),
            worker: WorkerLoopConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Build the layered settings source without deserializing it
    pub fn settings(path: Option<&Path>) -> Result<Config> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings)
    }

    /// Deserialize a previously built settings source
    pub fn from_settings(settings: &Config) -> Result<Self> {
        Ok(settings.clone().try_deserialize()?)
    }
}
