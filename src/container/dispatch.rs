// src/container/dispatch.rs
//! HTTP dispatch to a running job container

use crate::utils::errors::{Result, WorkerError};
use crate::utils::http::{self, HttpClient};
use bytes::Bytes;
use hyper::{Method, StatusCode};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of running one job in its container
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub status: StatusCode,
    pub body: Bytes,
    pub succeeded: bool,
}

impl JobResult {
    fn from_reply(job_id: &str, status: StatusCode, body: Bytes) -> Self {
        Self {
            job_id: job_id.to_string(),
            // anything below 400 counts as ok, redirects included
            succeeded: status.as_u16() < 400,
            status,
            body,
        }
    }
}

/// Sends job input to the container endpoint
pub struct ContainerDispatcher {
    client: HttpClient,
    port: u16,
    timeout: Option<Duration>,
}

impl ContainerDispatcher {
    pub fn new(port: u16, timeout: Option<Duration>) -> Self {
        Self {
            client: http::build_client(),
            port,
            timeout,
        }
    }

    pub fn endpoint(&self, address: IpAddr) -> String {
        format!("http://{}/", SocketAddr::new(address, self.port))
    }

    /// Call the container for `job_id`.
    ///
    /// With input the payload is POSTed as JSON. Without input a bare GET
    /// fetches whatever the container reports; the reply is the result
    /// regardless of its status.
    pub async fn dispatch(
        &self,
        job_id: &str,
        address: IpAddr,
        input: Option<&serde_json::Value>,
    ) -> Result<JobResult> {
        let url = self.endpoint(address);

        let req = match input {
            Some(payload) => {
                debug!(job_id, %url, "Posting job input to container");
                http::json_request(Method::POST, &url, payload)
            }
            None => {
                debug!(job_id, %url, "Probing container without input");
                http::empty_request(Method::GET, &url)
            }
        }
        .map_err(WorkerError::Dispatch)?;

        let send = http::send(&self.client, req);
        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| WorkerError::Timeout(limit.as_secs()))?,
            None => send.await,
        }
        .map_err(WorkerError::Dispatch)?;

        let result = JobResult::from_reply(job_id, reply.status, reply.body);
        info!(
            job_id,
            status = result.status.as_u16(),
            succeeded = result.succeeded,
            "Container responded"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http::test_server;
    use serde_json::json;

    fn loopback() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn input_is_posted_as_json() {
        let server = test_server::spawn(|_| (StatusCode::OK, "done".to_string())).await;
        let dispatcher = ContainerDispatcher::new(server.addr.port(), None);

        let result = dispatcher
            .dispatch("j1", loopback(), Some(&json!({"text": "hi"})))
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.body, Bytes::from("done"));

        let req = &server.recorded()[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/");
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn probe_sends_no_body_and_keeps_error_reply() {
        let server = test_server::spawn(|_| {
            (StatusCode::INTERNAL_SERVER_ERROR, "traceback".to_string())
        })
        .await;
        let dispatcher = ContainerDispatcher::new(server.addr.port(), None);

        let result = dispatcher.dispatch("j2", loopback(), None).await.unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(result.body, Bytes::from("traceback"));

        let req = &server.recorded()[0];
        assert_eq!(req.method, "GET");
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn unreachable_container_is_dispatch_error() {
        let dispatcher = ContainerDispatcher::new(1, None);
        let err = dispatcher.dispatch("j3", loopback(), None).await.unwrap_err();
        assert!(matches!(err, WorkerError::Dispatch(_)));
    }

    #[test]
    fn endpoint_brackets_ipv6() {
        let dispatcher = ContainerDispatcher::new(8000, None);
        assert_eq!(dispatcher.endpoint("::1".parse().unwrap()), "http://[::1]:8000/");
        assert_eq!(dispatcher.endpoint(loopback()), "http://127.0.0.1:8000/");
    }
}
