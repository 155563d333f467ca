// src/container/docker.rs
//! Docker CLI container runtime
//!
//! Each worker owns at most one job container at a time. Starting a new one
//! removes the previous container first.

use crate::container::{ContainerRuntime, ImageDescriptor, WorkerCredentials};
use crate::utils::errors::{Result, WorkerError};
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ADDRESS_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";

/// Runs job containers through the `docker` binary
pub struct DockerRuntime {
    /// Binary name or path as configured
    binary: String,

    /// Resolved executable (cached after first lookup)
    executable: Option<PathBuf>,

    credentials: Option<WorkerCredentials>,
    image: Option<ImageDescriptor>,
    container_id: Option<String>,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>, credentials: Option<WorkerCredentials>) -> Self {
        Self {
            binary: binary.into(),
            executable: None,
            credentials,
            image: None,
            container_id: None,
        }
    }

    /// Id of the running container, if any
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    fn find_executable(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.executable {
            return Ok(path.clone());
        }

        match which::which(&self.binary) {
            Ok(path) => {
                info!("Found {} at {:?}", self.binary, path);
                self.executable = Some(path.clone());
                Ok(path)
            }
            Err(e) => Err(WorkerError::Container(format!(
                "Executable '{}' not found in PATH: {}",
                self.binary, e
            ))),
        }
    }

    /// Global flags placed before the subcommand
    fn global_args(&self) -> Vec<String> {
        match &self.credentials {
            Some(creds) => vec!["--config".to_string(), creds.dir.display().to_string()],
            None => vec![],
        }
    }

    fn run_args(&self, image: &ImageDescriptor) -> Vec<String> {
        let mut args = self.global_args();
        args.push("run".to_string());
        args.push("-d".to_string());

        if image.pull {
            args.push("--pull=always".to_string());
        }

        for (key, value) in &image.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(image.image.clone());
        args.extend(image.command.iter().cloned());
        args
    }

    async fn docker(executable: &PathBuf, args: &[String]) -> Result<String> {
        debug!("docker {}", args.join(" "));

        let output = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WorkerError::Container(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(WorkerError::Container(if stderr.is_empty() {
                format!("docker exited with {:?}", output.status.code())
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn set_image_info(&mut self, image: ImageDescriptor) {
        self.image = Some(image);
    }

    async fn run(&mut self) -> Result<()> {
        let image = self
            .image
            .clone()
            .ok_or_else(|| WorkerError::Container("No image configured".into()))?;

        if self.container_id.is_some() {
            self.stop().await?;
        }

        let executable = self.find_executable()?;
        let id = Self::docker(&executable, &self.run_args(&image)).await?;

        // `run -d` may print pull progress before the id
        let id = id
            .lines()
            .last()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| WorkerError::Container("docker run printed no container id".into()))?
            .to_string();

        info!(container_id = %id, image = %image.image, "Container started");
        self.container_id = Some(id);
        Ok(())
    }

    async fn address(&self) -> Result<IpAddr> {
        let id = self
            .container_id
            .as_ref()
            .ok_or_else(|| WorkerError::Container("No container running".into()))?;
        let executable = self
            .executable
            .as_ref()
            .ok_or_else(|| WorkerError::Container("No container running".into()))?;

        let mut args = self.global_args();
        args.extend([
            "inspect".to_string(),
            "-f".to_string(),
            ADDRESS_TEMPLATE.to_string(),
            id.clone(),
        ]);

        let raw = Self::docker(executable, &args).await?;
        raw.parse().map_err(|_| {
            WorkerError::Container(format!("Container {} has no usable address: {:?}", id, raw))
        })
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(id) = self.container_id.take() else {
            return Ok(());
        };
        let executable = self.find_executable()?;

        let mut args = self.global_args();
        args.extend(["rm".to_string(), "-f".to_string(), id.clone()]);

        if let Err(e) = Self::docker(&executable, &args).await {
            warn!(container_id = %id, "Failed to remove container: {}", e);
            return Err(e);
        }

        debug!(container_id = %id, "Container removed");
        Ok(())
    }
}
