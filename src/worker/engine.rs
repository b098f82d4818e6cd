use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::ExecutionError;
use crate::task::{decode_values, encode_value, Task, TaskResult};
use crate::worker::loader::ExecutableLoader;

/// Decrements the in-flight counter when dropped, whichever way execution ends.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Runs tasks on a bounded pool.
///
/// Each task goes through load → decode arguments → resolve entry point →
/// invoke → encode result. The first failing stage ends the task with a failed
/// [`TaskResult`]; nothing a task does can take the worker down. A declared
/// timeout is not enforced, so a hung invocation holds its pool slot.
#[derive(Clone)]
pub struct ExecutionEngine {
    loader: Arc<ExecutableLoader>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    pool_size: usize,
}

impl ExecutionEngine {
    pub fn new(loader: Arc<ExecutableLoader>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            loader,
            permits: Arc::new(Semaphore::new(pool_size)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            pool_size,
        }
    }

    pub fn loader(&self) -> &Arc<ExecutableLoader> {
        &self.loader
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of tasks currently executing. Informational; may lag by one.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Execute a task to completion and return its result.
    pub async fn execute(&self, task: Task) -> TaskResult {
        let task_id = task.task_id;
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            tracing::warn!(task_id = %task_id, "Execution pool closed, task rejected");
            return TaskResult::failure(task_id, ExecutionError::PoolClosed.to_string());
        };

        let in_flight = self.in_flight.clone();
        let loader = self.loader.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _guard = InFlightGuard::enter(&in_flight);
            run_task(&loader, &task)
        })
        .await;

        match joined {
            Ok(Ok(bytes)) => {
                tracing::info!(task_id = %task_id, "Task completed successfully");
                TaskResult::success(task_id, bytes)
            }
            Ok(Err(e)) => {
                tracing::warn!(task_id = %task_id, error = %e, "Task failed");
                TaskResult::failure(task_id, e.to_string())
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Task panicked");
                TaskResult::failure(task_id, ExecutionError::Invocation(e.to_string()).to_string())
            }
        }
    }

    /// Execute a task in the background and hand its result to `on_complete`.
    pub fn execute_async<F, Fut>(&self, task: Task, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(TaskResult) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.execute(task).await;
            on_complete(result).await;
        })
    }

    /// Stop accepting work. Tasks already running are left to finish.
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

/// The task pipeline. Runs on a blocking thread.
fn run_task(loader: &ExecutableLoader, task: &Task) -> Result<Vec<u8>, ExecutionError> {
    tracing::debug!(
        task_id = %task.task_id,
        qualifier = %task.qualifier,
        entry_point = %task.entry_point,
        payload_bytes = task.payload.len(),
        argument_bytes = task.arguments.len(),
        "Executing task"
    );

    let unit = loader.load(&task.qualifier, &task.payload)?;

    let args = decode_values(&task.arguments)
        .map_err(|e| ExecutionError::ArgumentDecode(e.to_string()))?;

    let entry = unit.resolve(&task.entry_point, &args)?;

    let value = unit.invoke(entry, &args)?;
    tracing::debug!(task_id = %task.task_id, result = %value, "Entry point returned");

    encode_value(&value).map_err(|e| ExecutionError::ResultEncode(e.to_string()))
}
