//! HTTP client for the remote build service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Submission payload: target and project identifiers, the write-once
/// artifact locations the build should populate, and the experiment tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBuildRequest {
    pub target_id: String,
    pub project: String,
    pub experiment: String,
    /// Name the builder writes the fetched source under.
    pub target_filename: String,
    pub source_location: String,
    pub build_script_location: String,
    pub log_location: String,
    pub corpus_location: String,
    pub coverage_location: String,
    pub reproducer_location: String,
}

/// Remote build lifecycle as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBuildStatus {
    Queued,
    Working,
    Succeeded,
    Failed,
}

impl RemoteBuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteClientError {
    #[error("remote request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("remote service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected empty response from remote service")]
    EmptyResponse,
    #[error("invalid remote response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RemoteBuildClient: Send + Sync {
    /// Issue the submission request; returns the remote job identifier.
    async fn submit(&self, request: &RemoteBuildRequest) -> Result<String, RemoteClientError>;

    /// Query the build status. Cheap and safe to call repeatedly.
    async fn status(&self, remote_id: &str) -> Result<RemoteBuildStatus, RemoteClientError>;

    /// Ask the service to stop a build.
    async fn cancel(&self, remote_id: &str) -> Result<(), RemoteClientError>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    build_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: RemoteBuildStatus,
}

pub struct HttpRemoteBuildClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRemoteBuildClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RemoteClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Read a response body, mapping non-success statuses and empty bodies
    /// to typed errors so the retry classifier can see them.
    async fn read_body(response: reqwest::Response) -> Result<String, RemoteClientError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(RemoteClientError::EmptyResponse);
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteBuildClient for HttpRemoteBuildClient {
    async fn submit(&self, request: &RemoteBuildRequest) -> Result<String, RemoteClientError> {
        let response = self
            .http
            .post(format!("{}/v1/builds", self.base_url))
            .json(request)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| RemoteClientError::Decode(e.to_string()))?;
        Ok(parsed.build_id)
    }

    async fn status(&self, remote_id: &str) -> Result<RemoteBuildStatus, RemoteClientError> {
        let response = self
            .http
            .get(format!("{}/v1/builds/{remote_id}", self.base_url))
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        let parsed: StatusResponse =
            serde_json::from_str(&body).map_err(|e| RemoteClientError::Decode(e.to_string()))?;
        Ok(parsed.status)
    }

    async fn cancel(&self, remote_id: &str) -> Result<(), RemoteClientError> {
        let response = self
            .http
            .post(format!("{}/v1/builds/{remote_id}/cancel", self.base_url))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
