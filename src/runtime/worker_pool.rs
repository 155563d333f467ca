// src/runtime/worker_pool.rs
//! Fixed-size pool of worker processes
//!
//! Every slot gets its own OS process. Identities are provisioned in the
//! pool's process before anything is spawned, so a child only ever loads
//! an identity that already exists.
//!
//! ```text
//! WorkerPool
//! ├─ slot 0 → fleet-worker worker --slot 0   (pid 4101)
//! ├─ slot 1 → fleet-worker worker --slot 1   (pid 4102)
//! └─ slot 2 → fleet-worker worker --slot 2   (pid 4103)
//! ```
//!
//! There is no restart policy: a child that exits stays gone.

use crate::control_plane::ControlPlane;
use crate::runtime::process_manager::{ProcessManager, SpawnConfig};
use crate::runtime::worker_unit::WorkerUnit;
use crate::store::ConfigStore;
use crate::utils::errors::{Result, WorkerError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// One supervised slot
pub struct WorkerProcess {
    pub slot: usize,
    pub worker_id: String,
    spawn: SpawnConfig,
    child: Option<Child>,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

/// Exit of one worker process; `code` is `None` when killed by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotExit {
    pub slot: usize,
    pub code: Option<i32>,
}

/// Command line re-executing `program` as the worker for `slot`.
///
/// The child is pinned to the pool's state directory so it loads the
/// identity provisioned here, whatever its own config resolves to.
pub fn worker_command(
    program: &Path,
    config_path: Option<&Path>,
    state_dir: &Path,
    slot: usize,
) -> SpawnConfig {
    let mut spawn = SpawnConfig::new(program);
    if let Some(path) = config_path {
        spawn = spawn.arg("--config").arg(path.display().to_string());
    }
    spawn
        .arg("worker")
        .arg("--slot")
        .arg(slot.to_string())
        .env("FLEET_STATE_DIR", state_dir.display().to_string())
}

/// Supervises one process per worker slot
pub struct WorkerPool {
    workers: Vec<WorkerProcess>,
    manager: ProcessManager,
}

impl WorkerPool {
    /// Build a pool of `thread_count` workers that re-execute this binary
    pub async fn new(
        store: &ConfigStore,
        control_plane: &dyn ControlPlane,
        config_path: Option<PathBuf>,
    ) -> Result<Self> {
        let count: usize = store.get("thread_count", 1)?;
        let program = std::env::current_exe()?;

        Self::with_spawner(count, store, control_plane, |slot| {
            worker_command(&program, config_path.as_deref(), store.dir(), slot)
        })
        .await
    }

    /// Build a pool whose slot processes come from `spawn_for`
    pub async fn with_spawner<F>(
        count: usize,
        store: &ConfigStore,
        control_plane: &dyn ControlPlane,
        spawn_for: F,
    ) -> Result<Self>
    where
        F: Fn(usize) -> SpawnConfig,
    {
        info!("Initializing worker pool with {} processes", count);

        let mut workers = Vec::with_capacity(count);
        for slot in 0..count {
            let provisioned = WorkerUnit::provision(slot, store, control_plane).await?;
            debug!(slot, worker_id = %provisioned.identity.worker_id, "Slot provisioned");

            workers.push(WorkerProcess {
                slot,
                worker_id: provisioned.identity.worker_id,
                spawn: spawn_for(slot),
                child: None,
            });
        }

        Ok(Self {
            workers,
            manager: ProcessManager::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[WorkerProcess] {
        &self.workers
    }

    /// Pids of spawned children that have not been reaped
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().filter_map(WorkerProcess::pid).collect()
    }

    /// Number of children whose process still exists
    pub fn running(&self) -> usize {
        self.pids()
            .into_iter()
            .filter(|pid| self.manager.is_running(*pid))
            .count()
    }

    /// Launch every worker process; no ordering, no readiness wait
    pub fn start(&mut self) -> Result<()> {
        if self.workers.iter().any(|w| w.child.is_some()) {
            return Err(WorkerError::Process("Pool already started".into()));
        }

        for worker in &mut self.workers {
            let child = self.manager.spawn(&worker.spawn)?;
            info!(slot = worker.slot, pid = ?child.id(), "Worker process started");
            worker.child = Some(child);
        }

        Ok(())
    }

    /// Kill every worker process immediately; in-flight jobs are abandoned
    pub async fn kill(&mut self) -> Result<Vec<SlotExit>> {
        for pid in self.pids() {
            if let Err(e) = self.manager.kill(pid) {
                // already exited but not yet reaped
                debug!("Kill of PID {} failed: {}", pid, e);
            }
        }

        self.reap().await
    }

    /// Ask workers to stop (SIGTERM), killing whatever is left after `grace`
    pub async fn stop(&mut self, grace: Duration) -> Result<Vec<SlotExit>> {
        for pid in self.pids() {
            if let Err(e) = self.manager.terminate(pid) {
                debug!("SIGTERM to PID {} failed: {}", pid, e);
            }
        }

        if tokio::time::timeout(grace, self.wait()).await.is_ok() {
            return self.reap().await;
        }

        warn!("Workers still running after {:?}, killing", grace);
        self.kill().await
    }

    /// Wait until every worker process has exited
    pub async fn wait(&mut self) -> Result<Vec<SlotExit>> {
        let waits = self.workers.iter_mut().filter_map(|worker| {
            let slot = worker.slot;
            worker
                .child
                .as_mut()
                .map(|child| async move { (slot, child.wait().await) })
        });
        let statuses = futures::future::join_all(waits).await;

        let mut exits = Vec::with_capacity(statuses.len());
        for (slot, status) in statuses {
            let status = status?;
            if status.success() {
                info!(slot, "Worker process exited cleanly");
            } else {
                warn!(slot, "Worker process exited with {}", status);
            }
            exits.push(SlotExit {
                slot,
                code: status.code(),
            });
        }

        Ok(exits)
    }

    async fn reap(&mut self) -> Result<Vec<SlotExit>> {
        let exits = self.wait().await?;
        for worker in &mut self.workers {
            worker.child = None;
        }
        Ok(exits)
    }
}
