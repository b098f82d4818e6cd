use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;

const DEFAULT_RESULT_CAPACITY: usize = 10_000;

/// Configuration for the coordinator process.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// Upper bound on forwarding one task to a worker
    pub dispatch_timeout_ms: u64,
    /// Demote workers whose last heartbeat is older than this.
    /// `None` (the default) means liveness is never downgraded.
    pub stale_worker_after_ms: Option<u64>,
    pub sweep_interval_ms: u64,
    /// How many reported results are kept for lookup
    pub result_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dispatch_timeout_ms: 10_000,
            stale_worker_after_ms: None,
            sweep_interval_ms: 1_000,
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_stale_worker_after(mut self, after_ms: u64) -> Self {
        self.stale_worker_after_ms = Some(after_ms);
        self
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Heartbeat age after which the sweep demotes a worker, if the sweep is on.
    /// Thresholds beyond `i64::MAX` milliseconds are clamped.
    pub fn stale_worker_after(&self) -> Option<chrono::Duration> {
        self.stale_worker_after_ms.map(|ms| {
            chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
        })
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub listen_addr: SocketAddr,
    /// Address the coordinator should use to reach this worker.
    /// Defaults to `http://localhost:<bound port>`.
    pub advertise_addr: Option<String>,
    pub coordinator_url: String,
    pub heartbeat_initial_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Timeout for requests the worker makes to the coordinator
    pub request_timeout_ms: u64,
    /// Maximum number of tasks executing at once
    pub pool_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            advertise_addr: None,
            coordinator_url: "http://localhost:8080".to_string(),
            heartbeat_initial_delay_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            request_timeout_ms: 5_000,
            pool_size: default_pool_size(),
        }
    }
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            worker_id: worker_id.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_coordinator(mut self, url: impl Into<String>) -> Self {
        self.coordinator_url = url.into();
        self
    }

    pub fn with_heartbeat(mut self, initial_delay_ms: u64, interval_ms: u64) -> Self {
        self.heartbeat_initial_delay_ms = initial_delay_ms;
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// The address registered with the coordinator, given the port actually bound.
    pub fn advertised_address(&self, bound: SocketAddr) -> String {
        self.advertise_addr
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", bound.port()))
    }
}

pub fn default_worker_id() -> String {
    format!("worker-{}", Utc::now().timestamp_millis())
}

pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
