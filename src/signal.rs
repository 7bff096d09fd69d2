//! Interrupt handling. A signal only flips the shared token; the collection loops notice it at
//! their next iteration boundary and flush their checkpoints before returning.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for SIGINT or SIGTERM (Ctrl-C elsewhere).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Could not install SIGTERM handler: {e}");
            interrupt().await;
            return;
        }
    };

    tokio::select! {
        _ = interrupt() => {}
        _ = sigterm.recv() => {
            info!(signal = "SIGTERM", "Signal received, finishing current request");
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    interrupt().await;
}

async fn interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "SIGINT", "Signal received, finishing current request"),
        Err(e) => {
            warn!("Could not listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn install(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}
