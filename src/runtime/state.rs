// src/runtime/state.rs
//! Worker lifecycle state
//!
//! ```text
//! Idle → Registering → Listening ⇄ Processing → Acknowledging → Listening
//!                 ↑________________________________________________|
//! ```
//!
//! Only `Processing` carries an in-flight job: the window between taking a
//! job and reporting its outcome. That is the job an interrupted or failing
//! worker reports as failed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Registering,
    Listening,
    Processing {
        job_id: String,
        started_at: DateTime<Utc>,
    },
    /// Outcome reported, message acknowledgment pending
    Acknowledging { job_id: String },
}

impl WorkerState {
    pub fn processing(job_id: impl Into<String>) -> Self {
        WorkerState::Processing {
            job_id: job_id.into(),
            started_at: Utc::now(),
        }
    }

    /// Job whose outcome has not been reported yet
    pub fn in_flight_job(&self) -> Option<&str> {
        match self {
            WorkerState::Processing { job_id, .. } => Some(job_id.as_str()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Registering => "registering",
            WorkerState::Listening => "listening",
            WorkerState::Processing { .. } => "processing",
            WorkerState::Acknowledging { .. } => "acknowledging",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Processing { job_id, .. } | WorkerState::Acknowledging { job_id } => {
                write!(f, "{}({})", self.name(), job_id)
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// State shared between the run loop and the message handler
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<WorkerState>>);

impl StateCell {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(WorkerState::Idle)))
    }

    pub fn get(&self) -> WorkerState {
        self.0.lock().clone()
    }

    pub fn set(&self, state: WorkerState) {
        *self.0.lock() = state;
    }

    /// Claim the in-flight job for failure reporting.
    ///
    /// Moves the worker back to `Idle`, so a job is claimed at most once.
    pub fn take_in_flight(&self) -> Option<String> {
        let mut state = self.0.lock();
        let job_id = state.in_flight_job()?.to_string();
        *state = WorkerState::Idle;
        Some(job_id)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
