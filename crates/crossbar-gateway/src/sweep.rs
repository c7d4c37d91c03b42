//! Periodic liveness sweep over the connection registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;

/// Run liveness sweeps until cancelled.
///
/// Each `interval` tick runs one [`ConnectionRegistry::sweep`]: silent
/// connections are evicted, the rest are probed. A client therefore has one
/// full interval to answer a probe before the following sweep evicts it.
pub async fn run_sweeper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = time::interval(interval);
    // The immediate first tick would evict clients still mid-handshake.
    ticks.reset();

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let evicted = registry.sweep().await;
                if evicted.is_empty() {
                    debug!(connections = registry.count(), "sweep complete");
                } else {
                    info!(
                        evicted = evicted.len(),
                        connections = registry.count(),
                        "sweep evicted silent connections"
                    );
                }
            }
            () = cancel.cancelled() => {
                debug!("sweeper cancelled");
                return;
            }
        }
    }
}
