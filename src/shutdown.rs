//! Stop handling for the coordinator and worker processes.

use std::fmt;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// The signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Terminate,
    Interrupt,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Resolves with the first SIGTERM or SIGINT received after the call.
pub async fn stop_signal() -> std::io::Result<StopSignal> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = terminate.recv() => Ok(StopSignal::Terminate),
        _ = interrupt.recv() => Ok(StopSignal::Interrupt),
    }
}

/// Token that `role` ("coordinator" or "worker") drains on once a stop signal
/// arrives. If the handlers cannot be installed the error is logged and the
/// token only fires when cancelled by hand.
pub fn install_shutdown_handler(role: &'static str) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        match stop_signal().await {
            Ok(received) => {
                tracing::info!(role, signal = %received, "Stop requested, draining");
                trigger.cancel();
            }
            Err(e) => {
                tracing::error!(role, error = %e, "Cannot listen for stop signals");
            }
        }
    });

    token
}
