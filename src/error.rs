use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised on the coordinator while handling worker and submitter requests.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    RequestFormat(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("No available workers")]
    NoAvailableWorker,

    #[error("Task {0} is already assigned")]
    DuplicateTask(Uuid),

    #[error("Failed to send task to worker {worker_id}: {reason}")]
    DispatchTransport { worker_id: String, reason: String },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::RequestFormat(_) => StatusCode::BAD_REQUEST,
            DispatchError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DispatchError::NoAvailableWorker => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::DuplicateTask(_) => StatusCode::CONFLICT,
            DispatchError::DispatchTransport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure stages of the worker's task pipeline.
///
/// The `Display` form is what ends up in a failed `TaskResult`, so each
/// variant carries the stage tag a submitter sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("load error: {0}")]
    PayloadFormat(String),

    #[error("load error: {0}")]
    LoadLinkage(String),

    #[error("deserialization error: {0}")]
    ArgumentDecode(String),

    #[error("method not found: {0}")]
    EntryPointResolution(String),

    #[error("invocation error: {0}")]
    Invocation(String),

    #[error("serialization error: {0}")]
    ResultEncode(String),

    #[error("execution pool is shut down")]
    PoolClosed,
}

/// Errors from talking to a coordinator or worker over HTTP.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Fatal errors while starting or running a worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to register with coordinator: {0}")]
    Registration(#[source] ClientError),

    #[error("Worker server error: {0}")]
    Io(#[from] std::io::Error),
}
