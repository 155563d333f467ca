// src/queue/mod.rs
//! Queue subscription contract
//!
//! A subscription is a long-lived session that hands job notifications to a
//! [`JobHandler`] one at a time. Every delivered [`JobMessage`] carries its
//! own acknowledger; `ack` consumes the message, so it can be acknowledged
//! at most once. A message dropped unacknowledged is left to the broker's
//! redelivery.

pub mod memory;
pub mod pull;

pub use memory::{InMemoryPublisher, InMemorySubscription};
pub use pull::PullSubscription;

use crate::utils::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Broker-side acknowledgment for one delivered message
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// A job notification delivered by a subscription
pub struct JobMessage {
    job_id: String,
    payload: serde_json::Value,
    acker: Box<dyn Acknowledger>,
}

impl JobMessage {
    pub fn new(
        job_id: impl Into<String>,
        payload: serde_json::Value,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            payload,
            acker,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Message attributes beyond the job id
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Acknowledge and consume the message
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for JobMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMessage")
            .field("job_id", &self.job_id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Callback run for each delivered message
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, message: JobMessage) -> Result<()>;
}

/// A listening session on a job queue
#[async_trait]
pub trait QueueSubscription: Send + Sync {
    /// Deliver messages to `handler` until the session ends.
    ///
    /// Resolves `Ok` when the session closes cleanly and `Err` on transport
    /// failure or when the handler fails. Handler calls never overlap.
    async fn listen(&self, handler: Arc<dyn JobHandler>) -> Result<()>;
}
