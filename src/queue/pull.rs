// src/queue/pull.rs
//! HTTP pull subscription
//!
//! ```text
//! POST {broker}/subscriptions/{name}:pull         {"maxMessages": 1}
//!   -> {"receivedMessages": [{"ackId", "message": {"data", "attributes"}}]}
//! POST {broker}/subscriptions/{name}:acknowledge  {"ackIds": [...]}
//! ```
//!
//! `data` carries the job id. Every request sends the subscription token as
//! a bearer credential. When the worker's subscriber credentials name a
//! `project_id`, requests are billed to it through `x-goog-user-project`.

use crate::container::WorkerCredentials;
use crate::queue::{Acknowledger, JobHandler, JobMessage, QueueSubscription};
use crate::utils::errors::{Result, WorkerError};
use crate::utils::http::{self, HttpClient, HttpReply};
use async_trait::async_trait;
use hyper::header::{HeaderValue, AUTHORIZATION};
use hyper::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    data: String,
    #[serde(default)]
    attributes: serde_json::Value,
}

/// Fields of the subscriber credentials document the adapter uses
#[derive(Debug, Default, Deserialize)]
struct SubscriberCredentials {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
}

impl SubscriberCredentials {
    fn read(credentials: &WorkerCredentials) -> Result<Self> {
        let invalid = |e: WorkerError| {
            WorkerError::Queue(format!(
                "Unusable subscriber credentials {:?}: {}",
                credentials.config_file(),
                e
            ))
        };
        let document = credentials.document().map_err(invalid)?;
        serde_json::from_value(document).map_err(|e| invalid(e.into()))
    }
}

const USER_PROJECT: &str = "x-goog-user-project";

/// Shared request plumbing for pulls and acks
#[derive(Clone)]
struct Endpoint {
    client: HttpClient,
    base: String,
    bearer: HeaderValue,
    user_project: Option<HeaderValue>,
}

impl Endpoint {
    async fn post(&self, action: &str, body: &serde_json::Value) -> Result<HttpReply> {
        let uri = format!("{}:{}", self.base, action);
        let mut req = http::json_request(Method::POST, &uri, body).map_err(WorkerError::Queue)?;
        req.headers_mut().insert(AUTHORIZATION, self.bearer.clone());
        if let Some(project) = &self.user_project {
            req.headers_mut().insert(USER_PROJECT, project.clone());
        }

        let reply = http::send(&self.client, req)
            .await
            .map_err(WorkerError::Queue)?;
        if !reply.status.is_success() {
            return Err(WorkerError::Queue(format!(
                "{} returned {}: {}",
                action,
                reply.status,
                reply.text()
            )));
        }
        Ok(reply)
    }
}

struct PullAck {
    endpoint: Endpoint,
    ack_id: String,
    job_id: String,
}

#[async_trait]
impl Acknowledger for PullAck {
    async fn ack(&self) -> Result<()> {
        self.endpoint
            .post("acknowledge", &json!({ "ackIds": [self.ack_id] }))
            .await
            .map(|_| ())
            .map_err(|e| WorkerError::Acknowledge {
                job_id: self.job_id.clone(),
                reason: e.to_string(),
            })
    }
}

/// Polls a broker for job notifications
pub struct PullSubscription {
    endpoint: Endpoint,
    name: String,
    subscriber: Option<String>,
    poll_interval: Duration,
}

impl PullSubscription {
    pub fn new(
        broker_url: &str,
        name: impl Into<String>,
        token: &str,
        credentials: Option<&WorkerCredentials>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| WorkerError::Queue(format!("Invalid subscription token: {}", e)))?;

        let subscriber = match credentials {
            Some(credentials) => SubscriberCredentials::read(credentials)?,
            None => SubscriberCredentials::default(),
        };
        let user_project = subscriber
            .project_id
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| WorkerError::Queue(format!("Invalid project id: {}", e)))?;

        Ok(Self {
            endpoint: Endpoint {
                client: http::build_client(),
                base: format!("{}/subscriptions/{}", broker_url.trim_end_matches('/'), name),
                bearer,
                user_project,
            },
            name,
            subscriber: subscriber.client_email,
            poll_interval,
        })
    }

    async fn pull(&self) -> Result<Vec<ReceivedMessage>> {
        let reply = self
            .endpoint
            .post("pull", &json!({ "maxMessages": 1 }))
            .await?;
        if reply.body.is_empty() {
            return Ok(vec![]);
        }

        let parsed: PullResponse = serde_json::from_slice(&reply.body)?;
        Ok(parsed.received_messages)
    }
}

#[async_trait]
impl QueueSubscription for PullSubscription {
    async fn listen(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
        info!(
            subscription = %self.name,
            subscriber = self.subscriber.as_deref().unwrap_or("anonymous"),
            "Listening for jobs"
        );

        loop {
            let received = self.pull().await?;
            if received.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            for received in received {
                let job_id = received.message.data;
                debug!(job_id = %job_id, "Received job notification");

                let acker = PullAck {
                    endpoint: self.endpoint.clone(),
                    ack_id: received.ack_id,
                    job_id: job_id.clone(),
                };
                let message = JobMessage::new(job_id, received.message.attributes, Box::new(acker));
                handler.handle(message).await?;
            }
        }
    }
}
