//! Shutdown signal handling
//!
//! SIGINT and SIGTERM both stop a service. The first one cancels the
//! service's root `CancellationToken`, and every task holding a clone of it
//! winds down at its next suspension point.

use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    /// The token was cancelled by the service itself
    Cancelled,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Cancelled => write!(f, "cancellation"),
        }
    }
}

/// Cancel `cancel` on the first SIGINT or SIGTERM
///
/// Returns without waiting for a signal once `cancel` fires elsewhere.
pub async fn cancel_on_signal(cancel: &CancellationToken) -> ShutdownSignal {
    let signal = tokio::select! {
        () = cancel.cancelled() => return ShutdownSignal::Cancelled,
        signal = next_signal() => signal,
    };
    info!("{} received, stopping", signal);
    cancel.cancel();
    signal
}

#[cfg(unix)]
async fn next_signal() -> ShutdownSignal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(sig) => Some(sig),
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}, Ctrl+C only", e);
            None
        },
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
        _ = async {
            match terminate.as_mut() {
                Some(sig) => sig.recv().await,
                None => std::future::pending().await,
            }
        } => ShutdownSignal::Terminate,
    }
}

#[cfg(not(unix))]
async fn next_signal() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}
