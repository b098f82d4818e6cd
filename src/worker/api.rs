use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::coordinator::api::method_not_allowed;
use crate::error::DispatchError;
use crate::task::Task;
use crate::worker::agent::WorkerAgent;

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub status: String,
}

/// Routes served by a worker.
pub fn router(agent: Arc<WorkerAgent>) -> Router {
    Router::new()
        .route(
            "/api/tasks/execute",
            post(execute_task_handler).fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

/// Acknowledge a delivered task immediately; execution continues in the background.
async fn execute_task_handler(
    State(agent): State<Arc<WorkerAgent>>,
    body: Result<Json<Task>, JsonRejection>,
) -> Result<Json<AcceptedResponse>, DispatchError> {
    let Json(task) = body.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "Rejected task delivery");
        DispatchError::RequestFormat(rejection.body_text())
    })?;
    agent.accept(task);
    Ok(Json(AcceptedResponse {
        status: "accepted".to_string(),
    }))
}
