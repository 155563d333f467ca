// src/runtime/process_manager.rs
//! Process manager for spawning and signalling worker processes

use crate::utils::errors::{Result, WorkerError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Configuration for spawning a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Program name (looked up in `PATH`) or path
    pub program: PathBuf,

    pub args: Vec<String>,

    /// Extra environment variables
    pub env_vars: Vec<(String, String)>,
}

impl SpawnConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            env_vars: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

/// Spawns worker processes and delivers signals to them
pub struct ProcessManager {
    /// Resolved executables (cached)
    executable_paths: HashMap<PathBuf, PathBuf>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            executable_paths: HashMap::new(),
        }
    }

    fn find_executable(&mut self, program: &PathBuf) -> Result<PathBuf> {
        if let Some(path) = self.executable_paths.get(program) {
            return Ok(path.clone());
        }

        match which::which(program) {
            Ok(path) => {
                debug!("Resolved {:?} to {:?}", program, path);
                self.executable_paths.insert(program.clone(), path.clone());
                Ok(path)
            }
            Err(e) => Err(WorkerError::Process(format!(
                "Executable {:?} not found: {}",
                program, e
            ))),
        }
    }

    /// Spawn a process that inherits this process's stdout and stderr
    pub fn spawn(&mut self, config: &SpawnConfig) -> Result<Child> {
        let executable = self.find_executable(&config.program)?;

        let mut command = Command::new(&executable);
        command.args(&config.args);

        for (key, value) in &config.env_vars {
            command.env(key, value);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = command
            .spawn()
            .map_err(|e| WorkerError::Process(format!("Failed to spawn {:?}: {}", executable, e)))?;

        info!("Spawned {:?} with PID {:?}", executable, child.id());
        Ok(child)
    }

    /// Send `signal` to `pid`
    pub fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        debug!("Sending {} to PID {}", signal, pid);
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| WorkerError::Process(format!("Failed to send {}: {}", signal, e)))
    }

    /// Ask `pid` to shut down (SIGTERM)
    pub fn terminate(&self, pid: u32) -> Result<()> {
        self.signal(pid, Signal::SIGTERM)
    }

    /// Kill `pid` immediately (SIGKILL)
    pub fn kill(&self, pid: u32) -> Result<()> {
        self.signal(pid, Signal::SIGKILL)
    }

    /// Check whether a process with `pid` exists
    pub fn is_running(&self, pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
