//! HTTP client for a remote runtime agent.
//!
//! Speaks a small JSON protocol: `POST /v1/instances` to start,
//! `DELETE /v1/instances/{id}` to stop, `GET /v1/instances/{id}/status`
//! to inspect. The manager bounds every call with a timeout, so requests
//! here carry none of their own.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tracing::debug;

use crate::client::{
    ClientFuture, ProvisioningError, RuntimeClient, RuntimeStatus, StartRequest, StartedInstance,
};

/// Client for a runtime agent reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRuntime {
    /// Agent address as `host:port`, no scheme.
    agent: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: RuntimeStatus,
}

impl HttpRuntime {
    pub fn new(agent: &str) -> Self {
        let agent = agent
            .strip_prefix("http://")
            .unwrap_or(agent)
            .trim_end_matches('/')
            .to_string();
        Self { agent }
    }
}

/// One HTTP exchange with the agent over a fresh connection.
async fn exchange(
    agent: String,
    request: http::Request<Full<Bytes>>,
) -> Result<(http::StatusCode, Bytes), ProvisioningError> {
    let stream = tokio::net::TcpStream::connect(&agent)
        .await
        .map_err(|e| ProvisioningError::Unreachable(format!("{agent}: {e}")))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProvisioningError::Unreachable(format!("{agent}: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| ProvisioningError::Unreachable(format!("{agent}: {e}")))?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| ProvisioningError::Malformed(e.to_string()))?
        .to_bytes();
    Ok((status, body))
}

fn request_builder(agent: &str, method: &str, path: &str) -> http::request::Builder {
    http::Request::builder()
        .method(method)
        .uri(format!("http://{agent}{path}"))
        .header("host", agent)
        .header("user-agent", "convoy-runtime/0.1")
}

impl RuntimeClient for HttpRuntime {
    fn start(&self, request: StartRequest) -> ClientFuture<StartedInstance> {
        let agent = self.agent.clone();
        Box::pin(async move {
            let payload = serde_json::to_vec(&request)
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;
            let req = request_builder(&agent, "POST", "/v1/instances")
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(payload)))
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;

            let (status, body) = exchange(agent, req).await?;
            if !status.is_success() {
                return Err(ProvisioningError::Rejected(format!(
                    "{status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }
            let started: StartedInstance = serde_json::from_slice(&body)
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;
            debug!(
                instance = %request.instance_id,
                address = %started.address,
                "agent started instance"
            );
            Ok(started)
        })
    }

    fn stop(&self, instance_id: &str, grace: Duration) -> ClientFuture<()> {
        let agent = self.agent.clone();
        let id = instance_id.to_string();
        Box::pin(async move {
            let path = format!("/v1/instances/{id}?grace_secs={}", grace.as_secs());
            let req = request_builder(&agent, "DELETE", &path)
                .body(Full::new(Bytes::new()))
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;

            let (status, body) = exchange(agent, req).await?;
            if status == http::StatusCode::NOT_FOUND {
                return Err(ProvisioningError::UnknownInstance(id));
            }
            if !status.is_success() {
                return Err(ProvisioningError::Rejected(format!(
                    "{status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }
            Ok(())
        })
    }

    fn status(&self, instance_id: &str) -> ClientFuture<RuntimeStatus> {
        let agent = self.agent.clone();
        let id = instance_id.to_string();
        Box::pin(async move {
            let path = format!("/v1/instances/{id}/status");
            let req = request_builder(&agent, "GET", &path)
                .body(Full::new(Bytes::new()))
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;

            let (status, body) = exchange(agent, req).await?;
            if status == http::StatusCode::NOT_FOUND {
                return Ok(RuntimeStatus::Gone);
            }
            if !status.is_success() {
                return Err(ProvisioningError::Rejected(format!(
                    "{status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }
            let parsed: StatusResponse = serde_json::from_slice(&body)
                .map_err(|e| ProvisioningError::Malformed(e.to_string()))?;
            Ok(parsed.status)
        })
    }
}
