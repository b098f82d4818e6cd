use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::coordinator::registry::{WorkerRecord, WorkerStatus};
use crate::coordinator::router::DispatchRouter;
use crate::error::DispatchError;
use crate::task::{Task, TaskResult};

#[derive(Clone)]
pub struct CoordinatorState {
    pub router: Arc<DispatchRouter>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tasks: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerView {
    pub worker_id: String,
    pub address: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub active_tasks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_load: Option<usize>,
}

impl From<WorkerRecord> for WorkerView {
    fn from(record: WorkerRecord) -> Self {
        Self {
            active_tasks: record.active_count(),
            worker_id: record.worker_id,
            address: record.address,
            status: record.status,
            last_heartbeat: record.last_heartbeat,
            reported_load: record.reported_load,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
    pub worker_id: String,
    pub status: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn status(value: &str) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: value.to_string(),
    })
}

/// Routes served by the coordinator.
pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route(
            "/api/workers/register",
            post(register_worker_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/workers/heartbeat",
            post(heartbeat_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/workers",
            get(list_workers_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/tasks/submit",
            post(submit_task_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/tasks/result",
            post(report_result_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/tasks/:task_id",
            get(get_result_handler).fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) async fn method_not_allowed() -> DispatchError {
    DispatchError::MethodNotAllowed
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, DispatchError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| DispatchError::RequestFormat(rejection.body_text()))
}

async fn register_worker_handler(
    State(state): State<CoordinatorState>,
    body: Result<Json<RegisterWorkerRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, DispatchError> {
    let request = parse_body(body)?;
    if request.worker_id.trim().is_empty() || request.address.trim().is_empty() {
        return Err(DispatchError::RequestFormat(
            "workerId and address must not be empty".to_string(),
        ));
    }
    state
        .router
        .registry()
        .register(&request.worker_id, &request.address);
    Ok(status("registered"))
}

async fn heartbeat_handler(
    State(state): State<CoordinatorState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, DispatchError> {
    let request = parse_body(body)?;
    state
        .router
        .registry()
        .heartbeat(&request.worker_id, request.active_tasks);
    Ok(status("ok"))
}

async fn list_workers_handler(State(state): State<CoordinatorState>) -> Json<Vec<WorkerView>> {
    Json(
        state
            .router
            .registry()
            .list()
            .into_iter()
            .map(WorkerView::from)
            .collect(),
    )
}

async fn submit_task_handler(
    State(state): State<CoordinatorState>,
    body: Result<Json<Task>, JsonRejection>,
) -> Result<Json<SubmitTaskResponse>, DispatchError> {
    let task = parse_body(body)?;
    let assignment = state.router.submit(&task).await?;
    Ok(Json(SubmitTaskResponse {
        task_id: assignment.task_id,
        worker_id: assignment.worker_id,
        status: "assigned".to_string(),
    }))
}

async fn report_result_handler(
    State(state): State<CoordinatorState>,
    body: Result<Json<TaskResult>, JsonRejection>,
) -> Result<Json<StatusResponse>, DispatchError> {
    let result = parse_body(body)?;
    state.router.report_result(result).await;
    Ok(status("received"))
}

async fn get_result_handler(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResult>, DispatchError> {
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| DispatchError::RequestFormat(format!("invalid task id '{}'", task_id)))?;
    state
        .router
        .result(&task_id)
        .await
        .map(Json)
        .ok_or(DispatchError::TaskNotFound(task_id))
}
