//! HTTP client for the coordinator API, used by workers and the CLI.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::coordinator::api::{
    HeartbeatRequest, RegisterWorkerRequest, StatusResponse, SubmitTaskResponse, WorkerView,
};
use crate::error::ClientError;
use crate::task::{Task, TaskResult};

/// What a worker needs from its coordinator.
#[async_trait]
pub trait CoordinatorLink: Send + Sync {
    async fn register(&self, worker_id: &str, address: &str) -> Result<(), ClientError>;

    async fn heartbeat(&self, worker_id: &str, active_tasks: usize) -> Result<(), ClientError>;

    async fn report_result(&self, result: &TaskResult) -> Result<(), ClientError>;
}

#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    pub async fn submit(&self, task: &Task) -> Result<SubmitTaskResponse, ClientError> {
        self.post_json("/api/tasks/submit", task).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerView>, ClientError> {
        let response = self.http.get(self.url("/api/workers")).send().await?;
        Self::decode(response).await
    }

    /// Fetch a reported result. `None` if the coordinator has no result for the task.
    pub async fn result(&self, task_id: Uuid) -> Result<Option<TaskResult>, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/tasks/{}", task_id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }
}

#[async_trait]
impl CoordinatorLink for CoordinatorClient {
    async fn register(&self, worker_id: &str, address: &str) -> Result<(), ClientError> {
        let request = RegisterWorkerRequest {
            worker_id: worker_id.to_string(),
            address: address.to_string(),
        };
        let _: StatusResponse = self.post_json("/api/workers/register", &request).await?;
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str, active_tasks: usize) -> Result<(), ClientError> {
        let request = HeartbeatRequest {
            worker_id: worker_id.to_string(),
            active_tasks: Some(active_tasks),
        };
        let _: StatusResponse = self.post_json("/api/workers/heartbeat", &request).await?;
        Ok(())
    }

    async fn report_result(&self, result: &TaskResult) -> Result<(), ClientError> {
        let _: StatusResponse = self.post_json("/api/tasks/result", result).await?;
        Ok(())
    }
}
