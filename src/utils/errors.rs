// src/utils/errors.rs
//! Error types shared by every worker component

use thiserror::Error;

/// Errors raised while provisioning, running, or supervising workers
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Identity provisioning failed for slot {slot}: {reason}")]
    IdentityProvisioning { slot: usize, reason: String },

    #[error("Control plane returned {status} for {endpoint}: {body}")]
    ControlPlane {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Control plane request failed: {0}")]
    ControlPlaneTransport(String),

    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("Container dispatch failed: {0}")]
    Dispatch(String),

    #[error("Queue subscription error: {0}")]
    Queue(String),

    #[error("Acknowledge failed for job {job_id}: {reason}")]
    Acknowledge { job_id: String, reason: String },

    #[error("Config store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Observability setup failed: {0}")]
    Observability(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
