// src/control_plane/mod.rs
//! Control-plane contract
//!
//! The control plane issues worker identities, hands out job specifications
//! and receives completion reports. [`ControlPlane`] is the seam the worker
//! lifecycle depends on; [`HttpControlPlane`] is the REST adapter.

pub mod http;

pub use http::HttpControlPlane;

use crate::container::ImageDescriptor;
use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of one worker slot, issued once and persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub worker_id: String,

    /// Queue subscription this worker listens on
    pub subscription_name: String,

    /// Bearer token for the subscription
    #[serde(alias = "subscription_string")]
    pub subscription_token: String,

    /// Opaque credentials blob, handed to the container runtime
    #[serde(alias = "subscriber_json", default)]
    pub credentials: serde_json::Value,
}

/// What to run for a job, fetched by job id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(alias = "image_dict")]
    pub image: ImageDescriptor,

    /// Request payload forwarded to the container
    #[serde(alias = "data", default)]
    pub input: Option<serde_json::Value>,
}

impl JobSpec {
    /// The input payload, if it carries anything.
    ///
    /// Empty values (`null`, `false`, `0`, `""`, `[]`, `{}`) count as no
    /// input and send the job down the probe path.
    pub fn input_data(&self) -> Option<&serde_json::Value> {
        use serde_json::Value;

        self.input.as_ref().filter(|value| match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(fields) => !fields.is_empty(),
        })
    }
}

/// Request/response API consumed by workers and the pool
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Issue a fresh worker identity
    async fn create_worker(&self) -> Result<WorkerIdentity>;

    /// Announce the worker as alive; called before every listen and on heartbeat
    async fn register_worker(&self, worker_id: &str) -> Result<()>;

    /// Claim a job and fetch its spec
    async fn initiate_job(&self, worker_id: &str, job_id: &str) -> Result<JobSpec>;

    /// Report the terminal outcome of a job
    async fn complete_job(
        &self,
        worker_id: &str,
        job_id: &str,
        data: Option<&[u8]>,
        fail: bool,
    ) -> Result<()>;
}
