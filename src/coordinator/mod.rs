//! Coordinator side: worker registry, dispatch routing, and the HTTP surface.
//!
//! - [`registry::WorkerRegistry`]: liveness and load of every known worker
//! - [`router::DispatchRouter`]: least-loaded selection, forwarding, and
//!   ownership reconciliation
//! - [`api`]: JSON endpoints for workers and submitters
//!
//! Liveness is self-reported through heartbeats. Unless a stale threshold is
//! configured, a worker that stops sending heartbeats stays selectable until
//! the coordinator restarts.

pub mod api;
pub mod registry;
pub mod router;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;
use crate::coordinator::api::CoordinatorState;
use crate::coordinator::router::HttpTaskDelivery;

pub use registry::{WorkerRecord, WorkerRegistry, WorkerStatus};
pub use router::{Assignment, DispatchRouter, TaskDelivery};

/// The coordinator process
pub struct Coordinator {
    pub config: CoordinatorConfig,
    pub router: Arc<DispatchRouter>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let delivery = Arc::new(HttpTaskDelivery::new(config.dispatch_timeout()));
        Self::with_delivery(config, delivery)
    }

    pub fn with_delivery(config: CoordinatorConfig, delivery: Arc<dyn TaskDelivery>) -> Self {
        let registry = Arc::new(WorkerRegistry::new());
        let router = Arc::new(DispatchRouter::new(
            registry,
            delivery,
            config.result_capacity,
        ));
        Self { config, router }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        self.router.registry()
    }

    /// Serve the coordinator API on `listener` until `shutdown` is cancelled.
    ///
    /// Also runs the liveness sweep when `stale_worker_after_ms` is configured.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        if let Some(max_age) = self.config.stale_worker_after() {
            let registry = self.registry().clone();
            let interval = Duration::from_millis(self.config.sweep_interval_ms.max(1));
            let token = shutdown.clone();
            tokio::spawn(async move {
                Self::sweep_loop(registry, max_age, interval, token).await;
            });
        }

        let app = api::router(CoordinatorState {
            router: self.router.clone(),
        });

        tracing::info!(addr = ?listener.local_addr().ok(), "Starting coordinator server");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Coordinator server stopped");
        Ok(())
    }

    /// Periodically demote workers whose heartbeats have gone quiet.
    async fn sweep_loop(
        registry: Arc<WorkerRegistry>,
        max_age: chrono::Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    registry.demote_stale(max_age);
                }
            }
        }
    }
}
