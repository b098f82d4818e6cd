use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::CoordinatorLink;
use crate::config::WorkerConfig;
use crate::error::{ClientError, WorkerError};
use crate::task::Task;
use crate::worker::api;
use crate::worker::engine::ExecutionEngine;
use crate::worker::heartbeat::HeartbeatSender;
use crate::worker::loader::ExecutableLoader;

/// One worker process as seen by the coordinator: registration, heartbeats,
/// task intake and result reporting around an [`ExecutionEngine`].
pub struct WorkerAgent {
    config: WorkerConfig,
    engine: ExecutionEngine,
    link: Arc<dyn CoordinatorLink>,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig, link: Arc<dyn CoordinatorLink>) -> Self {
        let engine = ExecutionEngine::new(Arc::new(ExecutableLoader::new()), config.pool_size);
        Self {
            config,
            engine,
            link,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Hand a delivered task to the engine and return immediately.
    ///
    /// The result is reported to the coordinator when execution finishes. A
    /// failed report is logged and dropped.
    pub fn accept(&self, task: Task) -> JoinHandle<()> {
        tracing::info!(task_id = %task.task_id, worker_id = %self.config.worker_id, "Received task");
        let link = self.link.clone();
        self.engine.execute_async(task, move |result| async move {
            if let Err(e) = link.report_result(&result).await {
                tracing::error!(task_id = %result.task_id, error = %e, "Failed to send task result");
            }
        })
    }

    pub async fn register(&self, address: &str) -> Result<(), ClientError> {
        self.link.register(&self.config.worker_id, address).await?;
        tracing::info!(worker_id = %self.config.worker_id, address, "Registered with coordinator");
        Ok(())
    }

    pub fn spawn_heartbeat(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let sender = HeartbeatSender::new(
            self.config.heartbeat_initial_delay_ms,
            self.config.heartbeat_interval_ms,
        );
        let link = self.link.clone();
        let worker_id = self.config.worker_id.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            sender
                .run(link, worker_id, move || engine.in_flight(), shutdown)
                .await;
        })
    }

    /// Serve task delivery on `listener`, register, and heartbeat until
    /// `shutdown` is cancelled.
    ///
    /// Registration failure is fatal: the listener is stopped and the error
    /// returned.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), WorkerError> {
        let address = self.config.advertised_address(listener.local_addr()?);
        tracing::info!(
            worker_id = %self.config.worker_id,
            addr = %address,
            pool_size = self.engine.pool_size(),
            "Starting worker server"
        );

        let app = api::router(self.clone());
        let server_token = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_token.cancelled().await })
                .await
        });

        if let Err(e) = self.register(&address).await {
            tracing::error!(worker_id = %self.config.worker_id, error = %e, "Failed to register worker, stopping");
            shutdown.cancel();
            let _ = server.await;
            self.engine.shutdown();
            return Err(WorkerError::Registration(e));
        }

        let heartbeat = self.spawn_heartbeat(shutdown.clone());

        let served = server.await;
        shutdown.cancel();
        self.engine.shutdown();
        let _ = heartbeat.await;
        tracing::info!(worker_id = %self.config.worker_id, "Worker server stopped");

        match served {
            Ok(result) => Ok(result?),
            Err(e) => Err(WorkerError::Io(std::io::Error::other(e))),
        }
    }
}
