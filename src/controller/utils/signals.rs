use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` on ctrl+C or SIGTERM.
pub fn notify_cancellation_token(token: &Arc<CancellationToken>) {
    tokio::spawn({
        let token = token.clone();

        async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    return;
                }
            };
            tokio::select! {
                _ = signal::ctrl_c() => {
                   info!("Received ctrl+C, initiating graceful shutdown.");
                },
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown.");
                },
                _ = token.cancelled() => {
                    return;
                }
            }

            token.cancel();
        }
    });
}
