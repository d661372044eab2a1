//! Graceful shutdown utilities

use tracing::warn;

/// Wait for a shutdown signal (Ctrl+C, or SIGTERM on Unix).
///
/// Returns the name of the signal that fired, for the shutdown log line.
///
/// ```ignore
/// let signal = common::shutdown::wait_for_shutdown().await;
/// info!("{} received, stopping", signal);
/// ```
pub async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}, only Ctrl+C stops the service", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = async {
                match term_signal.as_mut() {
                    Some(sig) => {
                        sig.recv().await;
                    },
                    None => std::future::pending::<()>().await,
                }
            } => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
        "Ctrl+C"
    }
}
