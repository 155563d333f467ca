// src/control_plane/http.rs
//! REST adapter for the control plane
//!
//! ```text
//! POST /workers                     -> WorkerIdentity
//! POST /workers/{worker_id}/register
//! POST /jobs/{job_id}/initiate      {"worker_id"}              -> JobSpec
//! POST /jobs/{job_id}/complete      {"worker_id","fail","data"}
//! ```

use crate::control_plane::{ControlPlane, JobSpec, WorkerIdentity};
use crate::utils::errors::{Result, WorkerError};
use crate::utils::http::{self, HttpClient, HttpReply};
use async_trait::async_trait;
use hyper::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CompletionReport<'a> {
    worker_id: &'a str,
    fail: bool,
    data: Option<String>,
}

/// Control-plane client speaking JSON over HTTP/1.1
pub struct HttpControlPlane {
    base_url: String,
    client: HttpClient,
}

impl HttpControlPlane {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Self {
            base_url,
            client: http::build_client(),
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpReply> {
        let uri = format!("{}{}", self.base_url, path);
        debug!("POST {}", uri);

        let req = http::json_request(Method::POST, &uri, body)
            .map_err(WorkerError::ControlPlaneTransport)?;
        let reply = http::send(&self.client, req)
            .await
            .map_err(WorkerError::ControlPlaneTransport)?;

        if !reply.status.is_success() {
            return Err(WorkerError::ControlPlane {
                endpoint: path.to_string(),
                status: reply.status.as_u16(),
                body: reply.text(),
            });
        }

        Ok(reply)
    }

    async fn post_for<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let reply = self.post(path, body).await?;
        Ok(serde_json::from_slice(&reply.body)?)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_worker(&self) -> Result<WorkerIdentity> {
        self.post_for("/workers", &json!({})).await
    }

    async fn register_worker(&self, worker_id: &str) -> Result<()> {
        self.post(&format!("/workers/{}/register", worker_id), &json!({}))
            .await
            .map(|_| ())
    }

    async fn initiate_job(&self, worker_id: &str, job_id: &str) -> Result<JobSpec> {
        self.post_for(
            &format!("/jobs/{}/initiate", job_id),
            &json!({ "worker_id": worker_id }),
        )
        .await
    }

    async fn complete_job(
        &self,
        worker_id: &str,
        job_id: &str,
        data: Option<&[u8]>,
        fail: bool,
    ) -> Result<()> {
        let report = CompletionReport {
            worker_id,
            fail,
            data: data.map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        };

        self.post(&format!("/jobs/{}/complete", job_id), &report)
            .await
            .map(|_| ())
    }
}
