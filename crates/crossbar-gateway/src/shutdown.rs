//! Graceful teardown of one gateway process.
//!
//! Shutdown is more than cancelling loops: every live socket must be told
//! to close and its presence withdrawn, or the fleet keeps routing to a
//! shard that is gone until the mappings age out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Default time allowed for background loops to wind down.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Coordinates shutdown across the server, sweeper, and dispatcher tasks,
/// and disconnects this gateway's registry from the fleet on the way out.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ShutdownCoordinator {
    /// Create a coordinator that will drain `registry` at shutdown.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wind the gateway down.
    ///
    /// Cancels the token so the server stops accepting and the sweeper and
    /// dispatcher exit, closes every live connection and withdraws its
    /// presence so recipients re-route, then waits up to `timeout` for the
    /// given task handles to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let closed = self.registry.drain().await;
        info!(
            closed,
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "connections drained, waiting for background tasks"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbar_router::{DirectoryStore, MemoryDirectory, PresenceDirectory};

    use crate::connection::{TransportFrame, connection_pair};

    fn coordinator() -> (ShutdownCoordinator, Arc<MemoryDirectory>, Arc<ConnectionRegistry>) {
        let store = Arc::new(MemoryDirectory::new());
        let directory = PresenceDirectory::with_timeout(store.clone(), Duration::from_millis(100));
        let registry = Arc::new(ConnectionRegistry::new("gw-1".into(), directory, 64));
        (ShutdownCoordinator::new(registry.clone()), store, registry)
    }

    #[test]
    fn initial_state_not_shutting_down() {
        let (coord, _, _) = coordinator();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let (coord, _, _) = coordinator();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_disconnects_live_clients() {
        let (coord, store, registry) = coordinator();
        let (conn, mut rx) = connection_pair("u1".into(), 8);
        registry.register(conn).await.unwrap();

        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        coord.graceful_shutdown(vec![handle], None).await;

        assert!(coord.is_shutting_down());
        assert_eq!(registry.count(), 0);
        assert_eq!(rx.recv().await, Some(TransportFrame::Close));
        assert!(store.get(&"u1".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out_on_stuck_task() {
        let (coord, _, _) = coordinator();

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(50)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
