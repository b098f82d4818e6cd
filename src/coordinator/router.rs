use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::coordinator::registry::{WorkerRecord, WorkerRegistry};
use crate::error::{DispatchError, Result};
use crate::task::{decode_value, Task, TaskResult};

/// Channel the coordinator uses to hand a task to a worker.
#[async_trait]
pub trait TaskDelivery: Send + Sync {
    /// Deliver `task` to `worker`. Returns once the worker has acknowledged
    /// receipt, not when the task finishes.
    async fn deliver(&self, worker: &WorkerRecord, task: &Task) -> Result<()>;
}

/// Delivers tasks by POSTing them to the worker's `/api/tasks/execute` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTaskDelivery {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTaskDelivery {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl TaskDelivery for HttpTaskDelivery {
    async fn deliver(&self, worker: &WorkerRecord, task: &Task) -> Result<()> {
        let url = format!("{}/api/tasks/execute", worker.address.trim_end_matches('/'));
        let transport_error = |reason: String| DispatchError::DispatchTransport {
            worker_id: worker.worker_id.clone(),
            reason,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(task)
            .send()
            .await
            .map_err(|e| transport_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(transport_error(format!("worker responded {}: {}", status, body)));
        }

        tracing::debug!(task_id = %task.task_id, worker_id = %worker.worker_id, "Task delivered");
        Ok(())
    }
}

/// Bounded store of the most recently reported results, oldest evicted first.
#[derive(Debug)]
pub struct ResultStore {
    results: HashMap<Uuid, TaskResult>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl ResultStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, result: TaskResult) {
        let task_id = result.task_id;
        if self.results.insert(task_id, result).is_none() {
            self.order.push_back(task_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }

    pub fn get(&self, task_id: &Uuid) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Where a submitted task went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: Uuid,
    pub worker_id: String,
}

/// Routes submitted tasks to the least-loaded alive worker and reconciles
/// ownership when results come back.
pub struct DispatchRouter {
    registry: Arc<WorkerRegistry>,
    delivery: Arc<dyn TaskDelivery>,
    owners: DashMap<Uuid, String>,
    results: RwLock<ResultStore>,
}

impl DispatchRouter {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        delivery: Arc<dyn TaskDelivery>,
        result_capacity: usize,
    ) -> Self {
        Self {
            registry,
            delivery,
            owners: DashMap::new(),
            results: RwLock::new(ResultStore::with_capacity(result_capacity)),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Pick a worker, forward the task to it, and record ownership.
    ///
    /// Ownership is claimed before forwarding and rolled back if forwarding
    /// fails, so a result that races ahead of the acknowledgement still finds
    /// its owner. There is no retry and no fallback to another worker.
    pub async fn submit(&self, task: &Task) -> Result<Assignment> {
        let worker = self
            .registry
            .least_loaded()
            .ok_or(DispatchError::NoAvailableWorker)?;

        match self.owners.entry(task.task_id) {
            Entry::Occupied(_) => return Err(DispatchError::DuplicateTask(task.task_id)),
            Entry::Vacant(slot) => {
                slot.insert(worker.worker_id.clone());
            }
        }
        self.registry.assign(&worker.worker_id, task.task_id);

        tracing::info!(
            task_id = %task.task_id,
            worker_id = %worker.worker_id,
            active_tasks = worker.active_count(),
            "Task assigned"
        );

        if let Err(e) = self.delivery.deliver(&worker, task).await {
            self.owners.remove(&task.task_id);
            self.registry.release(&worker.worker_id, &task.task_id);
            tracing::error!(task_id = %task.task_id, worker_id = %worker.worker_id, error = %e, "Dispatch failed");
            return Err(e);
        }

        Ok(Assignment {
            task_id: task.task_id,
            worker_id: worker.worker_id,
        })
    }

    /// Clear ownership for a finished task. Results for unknown task ids are
    /// ignored. Returns the worker that owned the task.
    pub async fn report_result(&self, result: TaskResult) -> Option<String> {
        let task_id = result.task_id;
        let Some((_, worker_id)) = self.owners.remove(&task_id) else {
            tracing::debug!(task_id = %task_id, "Result for unknown task ignored");
            return None;
        };
        self.registry.release(&worker_id, &task_id);

        match &result.outcome {
            Ok(bytes) => match decode_value(bytes) {
                Ok(value) => {
                    tracing::info!(task_id = %task_id, worker_id = %worker_id, result = %value, "Task completed")
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, worker_id = %worker_id, error = %e, "Task completed with undecodable result")
                }
            },
            Err(message) => {
                tracing::warn!(task_id = %task_id, worker_id = %worker_id, error = %message, "Task failed")
            }
        }

        self.results.write().await.insert(result);
        Some(worker_id)
    }

    pub fn owner_of(&self, task_id: &Uuid) -> Option<String> {
        self.owners.get(task_id).map(|owner| owner.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.owners.len()
    }

    pub async fn result(&self, task_id: &Uuid) -> Option<TaskResult> {
        self.results.read().await.get(task_id).cloned()
    }
}
