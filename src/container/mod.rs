// src/container/mod.rs
//! Container execution
//!
//! - **Runtime**: [`ContainerRuntime`] starts a job image and exposes its
//!   address; [`DockerRuntime`] drives the docker CLI
//! - **Dispatch**: [`ContainerDispatcher`] calls the HTTP endpoint the job
//!   container serves and turns the reply into a [`JobResult`]

pub mod dispatch;
pub mod docker;

pub use dispatch::{ContainerDispatcher, JobResult};
pub use docker::DockerRuntime;

use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Container configuration for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Image reference, including tag or digest
    pub image: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Overrides the image's default command when non-empty
    #[serde(default)]
    pub command: Vec<String>,

    /// Always pull before starting
    #[serde(default)]
    pub pull: bool,
}

impl ImageDescriptor {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
            command: Vec::new(),
            pull: false,
        }
    }
}

/// Slot-private credentials handed to the container runtime and the queue
/// subscription.
///
/// `dir` holds a `config.json` usable as a docker client config directory.
/// The same document is the subscriber credential for the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCredentials {
    pub dir: PathBuf,
}

impl WorkerCredentials {
    pub fn config_file(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    /// Parse the credentials document
    pub fn document(&self) -> Result<serde_json::Value> {
        let raw = std::fs::read(self.config_file())?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Launches job containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Select what the next `run` starts
    fn set_image_info(&mut self, image: ImageDescriptor);

    /// Start a container from the configured image
    async fn run(&mut self) -> Result<()>;

    /// Network address of the running container
    async fn address(&self) -> Result<IpAddr>;

    /// Tear the running container down; no-op when nothing runs
    async fn stop(&mut self) -> Result<()>;
}
