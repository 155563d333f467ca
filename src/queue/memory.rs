// src/queue/memory.rs
//! In-process subscription backed by a channel
//!
//! Useful for embedding a worker in another process and for exercising the
//! worker lifecycle without a broker. The session ends cleanly once every
//! publisher is dropped.

use crate::queue::{Acknowledger, JobHandler, JobMessage, QueueSubscription};
use crate::utils::errors::{Result, WorkerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

enum Delivery {
    Message(JobMessage),
    Fail(String),
}

struct RecordingAck {
    job_id: String,
    acked: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Acknowledger for RecordingAck {
    async fn ack(&self) -> Result<()> {
        self.acked.lock().push(self.job_id.clone());
        Ok(())
    }
}

/// Sending half of an [`InMemorySubscription`]
#[derive(Clone)]
pub struct InMemoryPublisher {
    tx: mpsc::UnboundedSender<Delivery>,
    acked: Arc<Mutex<Vec<String>>>,
}

impl InMemoryPublisher {
    /// Queue a job notification
    pub fn publish(&self, job_id: impl Into<String>) -> Result<()> {
        let job_id = job_id.into();
        let acker = RecordingAck {
            job_id: job_id.clone(),
            acked: Arc::clone(&self.acked),
        };
        let message = JobMessage::new(job_id, serde_json::Value::Null, Box::new(acker));

        self.tx
            .send(Delivery::Message(message))
            .map_err(|_| WorkerError::Queue("Subscription closed".into()))
    }

    /// Make the session fail as a broken transport would
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.tx
            .send(Delivery::Fail(reason.into()))
            .map_err(|_| WorkerError::Queue("Subscription closed".into()))
    }

    /// Job ids acknowledged so far, in order
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }
}

/// Receiving half: a subscription fed by [`InMemoryPublisher`]
pub struct InMemorySubscription {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl InMemorySubscription {
    pub fn new() -> (Self, InMemoryPublisher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = InMemoryPublisher {
            tx,
            acked: Arc::new(Mutex::new(Vec::new())),
        };

        (
            Self {
                rx: tokio::sync::Mutex::new(rx),
            },
            publisher,
        )
    }
}

#[async_trait]
impl QueueSubscription for InMemorySubscription {
    async fn listen(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
        let mut rx = self.rx.lock().await;

        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Message(message) => handler.handle(message).await?,
                Delivery::Fail(reason) => return Err(WorkerError::Queue(reason)),
            }
        }

        Ok(())
    }
}
