//! Test harness for coordinator/worker integration tests.
//!
//! Provides WebAssembly fixtures, in-process coordinators and workers bound to
//! ephemeral ports, and recording fakes for the delivery and coordinator seams.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use workmesh::client::CoordinatorLink;
use workmesh::config::{CoordinatorConfig, WorkerConfig};
use workmesh::coordinator::{Coordinator, DispatchRouter, TaskDelivery, WorkerRecord};
use workmesh::error::{ClientError, DispatchError, WorkerError};
use workmesh::task::{encode_values, Task, TaskResult, Value};
use workmesh::worker::WorkerAgent;

// =============================================================================
// Payload fixtures
// =============================================================================

pub const ADD_WAT: &str = r#"
(module
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add)
  (func (export "mul64") (param i64 i64) (result i64)
    local.get 0
    local.get 1
    i64.mul)
  (func (export "noop")))
"#;

pub const TRAP_WAT: &str = r#"
(module
  (func (export "boom") (result i32)
    unreachable))
"#;

pub const COUNTER_WAT: &str = r#"
(module
  (global $count (mut i32) (i32.const 0))
  (func (export "next") (result i32)
    global.get $count
    i32.const 1
    i32.add
    global.set $count
    global.get $count))
"#;

pub const IMPORT_WAT: &str = r#"
(module
  (import "env" "host_log" (func $log (param i32)))
  (func (export "run")
    i32.const 1
    call $log))
"#;

pub const DIVMOD_WAT: &str = r#"
(module
  (func (export "divmod") (param i32 i32) (result i32 i32)
    local.get 0
    local.get 1
    i32.div_s
    local.get 0
    local.get 1
    i32.rem_s))
"#;

/// `spin(n)` counts to `n` and returns it. Keeps a pool slot busy for a while.
pub const SPIN_WAT: &str = r#"
(module
  (func (export "spin") (param $n i32) (result i32)
    (local $i i32)
    (block $done
      (loop $again
        local.get $i
        local.get $n
        i32.ge_s
        br_if $done
        local.get $i
        i32.const 1
        i32.add
        local.set $i
        br $again))
    local.get $i))
"#;

/// Its start function never returns, so instantiation never completes.
pub const STUCK_START_WAT: &str = r#"
(module
  (func $forever
    (loop $again
      br $again))
  (start $forever)
  (func (export "unreachable_after_start") (result i32)
    i32.const 0))
"#;

/// Iterations that keep `spin` running well past a few polling intervals.
pub const LONG_SPIN: i32 = 10_000_000;

pub fn wasm(source: &str) -> Vec<u8> {
    wat::parse_str(source).expect("fixture should assemble")
}

pub fn args(values: &[Value]) -> Vec<u8> {
    encode_values(values).expect("arguments should encode")
}

pub fn add_task(a: i32, b: i32) -> Task {
    Task::new(
        "adder",
        "add",
        wasm(ADD_WAT),
        args(&[Value::I32(a), Value::I32(b)]),
    )
}

pub fn spin_task(iterations: i32) -> Task {
    Task::new(
        "spinner",
        "spin",
        wasm(SPIN_WAT),
        args(&[Value::I32(iterations)]),
    )
}

// =============================================================================
// Fakes
// =============================================================================

/// Delivery that records what it was asked to send and can be told to fail.
#[derive(Default)]
pub struct RecordingDelivery {
    pub delivered: Mutex<Vec<(String, Uuid)>>,
    fail: AtomicBool,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let delivery = Self::default();
        delivery.fail.store(true, Ordering::SeqCst);
        Arc::new(delivery)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(String, Uuid)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDelivery for RecordingDelivery {
    async fn deliver(&self, worker: &WorkerRecord, task: &Task) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::DispatchTransport {
                worker_id: worker.worker_id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .push((worker.worker_id.clone(), task.task_id));
        Ok(())
    }
}

/// Coordinator link that records every call instead of talking HTTP.
#[derive(Default)]
pub struct RecordingLink {
    pub registrations: Mutex<Vec<(String, String)>>,
    pub heartbeats: Mutex<Vec<(String, usize)>>,
    pub results: Mutex<Vec<TaskResult>>,
    pub fail_register: AtomicBool,
    pub fail_reports: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.lock().unwrap().len()
    }
}

fn refused() -> ClientError {
    ClientError::InvalidResponse("coordinator unreachable".to_string())
}

#[async_trait]
impl CoordinatorLink for RecordingLink {
    async fn register(&self, worker_id: &str, address: &str) -> Result<(), ClientError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(refused());
        }
        self.registrations
            .lock()
            .unwrap()
            .push((worker_id.to_string(), address.to_string()));
        Ok(())
    }

    async fn heartbeat(&self, worker_id: &str, active_tasks: usize) -> Result<(), ClientError> {
        self.heartbeats
            .lock()
            .unwrap()
            .push((worker_id.to_string(), active_tasks));
        Ok(())
    }

    async fn report_result(&self, result: &TaskResult) -> Result<(), ClientError> {
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(refused());
        }
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

// =============================================================================
// In-process servers
// =============================================================================

/// Handle to a coordinator serving on an ephemeral local port
pub struct TestCoordinator {
    pub addr: SocketAddr,
    pub url: String,
    pub router: Arc<DispatchRouter>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestCoordinator {
    pub async fn start() -> Self {
        Self::start_with(CoordinatorConfig::default()).await
    }

    pub async fn start_with(config: CoordinatorConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Coordinator::new(config);
        let router = coordinator.router.clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = coordinator.run(listener, token).await;
        });
        Self {
            addr,
            url: format!("http://{}", addr),
            router,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Test worker configuration with short heartbeats for faster tests
pub fn test_worker_config(worker_id: &str, coordinator_url: &str, port: u16) -> WorkerConfig {
    let mut config = WorkerConfig::new(worker_id, format!("127.0.0.1:{}", port).parse().unwrap())
        .with_coordinator(coordinator_url)
        .with_heartbeat(50, 100)
        .with_pool_size(2);
    config.advertise_addr = Some(format!("http://127.0.0.1:{}", port));
    config
}

/// Handle to a worker serving on an ephemeral local port
pub struct TestWorker {
    pub worker_id: String,
    pub url: String,
    pub agent: Arc<WorkerAgent>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), WorkerError>>,
}

impl TestWorker {
    /// Start a worker that talks to `coordinator_url` over HTTP.
    pub async fn start(worker_id: &str, coordinator_url: &str) -> Self {
        let link = workmesh::client::CoordinatorClient::new(coordinator_url, Duration::from_secs(5))
            .unwrap();
        Self::start_with_link(worker_id, coordinator_url, Arc::new(link)).await
    }

    pub async fn start_with_link(
        worker_id: &str,
        coordinator_url: &str,
        link: Arc<dyn CoordinatorLink>,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = test_worker_config(worker_id, coordinator_url, port);
        let agent = Arc::new(WorkerAgent::new(config, link));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(agent.clone().run(listener, shutdown.clone()));
        Self {
            worker_id: worker_id.to_string(),
            url: format!("http://127.0.0.1:{}", port),
            agent,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) -> Result<(), WorkerError> {
        self.shutdown.cancel();
        self.handle.await.expect("worker task should not panic")
    }

    /// Wait for the worker task to end on its own.
    pub async fn join(self) -> Result<(), WorkerError> {
        self.handle.await.expect("worker task should not panic")
    }
}

// =============================================================================
// Polling helpers
// =============================================================================

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
