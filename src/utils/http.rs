// src/utils/http.rs
//! Thin HTTP/1.1 client helpers shared by the control-plane, queue and
//! container adapters

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;

/// Pooled plaintext HTTP client
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Status and fully collected body of a response
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpReply {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Build a client on the current tokio runtime
pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Build a request carrying a JSON body
pub fn json_request<T: Serialize>(
    method: Method,
    uri: &str,
    body: &T,
) -> Result<Request<Full<Bytes>>, String> {
    let payload = serde_json::to_vec(body).map_err(|e| format!("Body encode error: {}", e))?;

    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::from(payload)))
        .map_err(|e| format!("Request build error: {}", e))?;
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(req)
}

/// Build a request with no body
pub fn empty_request(method: Method, uri: &str) -> Result<Request<Full<Bytes>>, String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .map_err(|e| format!("Request build error: {}", e))
}

/// Send a request and collect the whole response body
pub async fn send(client: &HttpClient, req: Request<Full<Bytes>>) -> Result<HttpReply, String> {
    let response = client
        .request(req)
        .await
        .map_err(|e| format!("Request failed: {}", e))?;

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| format!("Response body error: {}", e))?
        .to_bytes();

    Ok(HttpReply {
        status: parts.status,
        body,
    })
}
