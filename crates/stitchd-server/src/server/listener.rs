//! Accept loop.
//!
//! Spawns one IO worker per accepted connection. A semaphore permit is taken
//! *before* `accept`, so at most `max_connections` workers exist at once and
//! further clients wait in the kernel's listen backlog.

use crate::server::{service::handler::ImputeService, telemetry::increment_connections};
use core::{future::Future, time::Duration};
use std::sync::Arc;
use stitchd_core::Result;
use tokio::{net::TcpListener, sync::Semaphore, time::sleep};

/// Pause after a failed `accept` (e.g. out of file descriptors) so the loop
/// does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves connections until `signal` resolves, then shuts `service` down.
///
/// # Errors
///
/// Returns whatever [`ImputeService::shutdown`] reports.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    service: ImputeService,
    max_connections: usize,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    tokio::pin!(signal);

    loop {
        let permit = tokio::select! {
            biased;
            () = &mut signal => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            biased;
            () = &mut signal => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {e}");
                    sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        increment_connections();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "Could not set TCP_NODELAY: {e}");
        }

        let service = service.clone();
        tokio::spawn(async move {
            service.handle_connection(stream, peer).await;
            drop(permit);
        });
    }

    drop(listener);
    tracing::info!("Listener stopped accepting connections");
    service.shutdown().await
}
