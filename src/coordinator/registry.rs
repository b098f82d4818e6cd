use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Alive,
    Unavailable,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Alive => write!(f, "ALIVE"),
            WorkerStatus::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// Coordinator-side bookkeeping for one worker
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub address: String,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Tasks dispatched to this worker that have no reported result yet
    pub active_tasks: HashSet<Uuid>,
    /// In-flight count the worker last reported about itself
    pub reported_load: Option<usize>,
}

impl WorkerRecord {
    pub fn new(worker_id: String, address: String) -> Self {
        Self {
            worker_id,
            address,
            status: WorkerStatus::Alive,
            last_heartbeat: Utc::now(),
            active_tasks: HashSet::new(),
            reported_load: None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_tasks.len()
    }

    pub fn is_alive(&self) -> bool {
        self.status == WorkerStatus::Alive
    }
}

/// Concurrent directory of known workers.
///
/// Every mutation of a record happens while holding that record's map entry,
/// so a heartbeat and an assignment on the same worker never overwrite each
/// other.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous record under the same id.
    pub fn register(&self, worker_id: &str, address: &str) -> WorkerRecord {
        let record = WorkerRecord::new(worker_id.to_string(), address.to_string());
        if let Some(previous) = self.workers.insert(worker_id.to_string(), record.clone()) {
            tracing::info!(
                worker_id,
                address,
                dropped_tasks = previous.active_count(),
                "Worker re-registered"
            );
        } else {
            tracing::info!(worker_id, address, "Worker registered");
        }
        record
    }

    /// Refresh a known worker's heartbeat and mark it alive. Unknown ids are ignored.
    pub fn heartbeat(&self, worker_id: &str, reported_load: Option<usize>) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(mut worker) => {
                worker.last_heartbeat = Utc::now();
                worker.status = WorkerStatus::Alive;
                if reported_load.is_some() {
                    worker.reported_load = reported_load;
                }
                true
            }
            None => {
                tracing::debug!(worker_id, "Heartbeat from unknown worker ignored");
                false
            }
        }
    }

    pub fn set_status(&self, worker_id: &str, status: WorkerStatus) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(mut worker) => {
                if worker.status != status {
                    tracing::info!(worker_id, status = %status, "Worker status changed");
                }
                worker.status = status;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.get(worker_id).map(|w| w.clone())
    }

    /// Snapshot of all records, ordered by worker id
    pub fn list(&self) -> Vec<WorkerRecord> {
        let mut workers: Vec<WorkerRecord> = self.workers.iter().map(|w| w.clone()).collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    /// Alive worker with the fewest owned tasks. Ties go to the lowest worker id.
    pub fn least_loaded(&self) -> Option<WorkerRecord> {
        self.list()
            .into_iter()
            .filter(WorkerRecord::is_alive)
            .min_by_key(WorkerRecord::active_count)
    }

    pub fn assign(&self, worker_id: &str, task_id: Uuid) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(mut worker) => worker.active_tasks.insert(task_id),
            None => false,
        }
    }

    pub fn release(&self, worker_id: &str, task_id: &Uuid) -> bool {
        match self.workers.get_mut(worker_id) {
            Some(mut worker) => worker.active_tasks.remove(task_id),
            None => false,
        }
    }

    /// Mark alive workers whose last heartbeat is older than `max_age` as
    /// unavailable. Returns the ids that were demoted. An age reaching back
    /// past the representable time range demotes nothing.
    pub fn demote_stale(&self, max_age: Duration) -> Vec<String> {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
            return Vec::new();
        };
        let mut demoted = Vec::new();
        for mut worker in self.workers.iter_mut() {
            if worker.is_alive() && worker.last_heartbeat < cutoff {
                worker.status = WorkerStatus::Unavailable;
                demoted.push(worker.worker_id.clone());
            }
        }
        for worker_id in &demoted {
            tracing::warn!(worker_id = %worker_id, "Worker heartbeat stale, marked unavailable");
        }
        demoted
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
