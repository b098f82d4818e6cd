//! Worker side: loading and running task payloads.
//!
//! # Components
//!
//! - [`loader::ExecutableLoader`]: validates WebAssembly payloads and caches
//!   one instantiated unit per qualifier
//! - [`engine::ExecutionEngine`]: bounded pool that runs the
//!   load → decode → resolve → invoke → encode pipeline
//! - [`heartbeat::HeartbeatSender`]: periodic liveness/load report
//! - [`agent::WorkerAgent`]: registration, task intake, result reporting
//!
//! # Execution Flow
//!
//! 1. The coordinator POSTs a task to `/api/tasks/execute`
//! 2. The agent acknowledges at once and queues the task on the engine
//! 3. The engine produces a [`TaskResult`](crate::task::TaskResult)
//! 4. The agent reports the result; a failed report is only logged

pub mod agent;
pub mod api;
pub mod engine;
pub mod heartbeat;
pub mod loader;

pub use agent::WorkerAgent;
pub use engine::ExecutionEngine;
pub use loader::{ExecutableLoader, LoadedUnit};
