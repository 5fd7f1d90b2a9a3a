//! Process-level signal plumbing.

use tokio::signal;
use tracing::info;

/// Resolves when the process is asked to stop (Ctrl+C, or SIGTERM on Unix).
///
/// Handed to `axum::serve` as the graceful-shutdown future so in-flight
/// requests drain before the listener closes.
///
/// # Panics
///
/// Panics if a signal handler cannot be installed; a gateway that cannot be
/// stopped cleanly should not keep serving.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            panic!("cannot install Ctrl+C handler: {e}");
        }
        "Ctrl+C"
    };

    #[cfg(unix)]
    let terminate = async {
        let mut stream = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => panic!("cannot install SIGTERM handler: {e}"),
        };
        stream.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Shutdown signal received, draining requests");
}
