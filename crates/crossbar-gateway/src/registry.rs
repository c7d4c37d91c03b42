//! Connection registry: live connections owned by this gateway, keyed by
//! recipient, kept consistent with the presence directory.
//!
//! Registration publishes the mapping before the connection is visible;
//! teardown withdraws it with compare-and-delete so a reconnect that already
//! moved the recipient to another shard is never clobbered.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use crossbar_core::{RecipientId, ShardId};
use crossbar_router::{DirectoryError, PresenceDirectory};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::{GatewayConnection, TransportFrame};

/// Why a connection could not be registered.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The gateway is at its connection cap.
    #[error("connection limit reached ({limit})")]
    AtCapacity {
        /// The configured cap.
        limit: usize,
    },

    /// Presence could not be published; an invisible connection is useless,
    /// so the upgrade is refused and the client retries elsewhere.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Live connections of one gateway process.
///
/// An owned instance, created per gateway; several can coexist in one
/// process, which the tests rely on.
pub struct ConnectionRegistry {
    shard: ShardId,
    directory: PresenceDirectory,
    connections: DashMap<RecipientId, Arc<GatewayConnection>>,
    max_connections: usize,
    // Slots claimed before the publish await; the map alone cannot enforce
    // the cap across in-flight registrations.
    occupancy: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create a registry for `shard`, publishing into `directory`.
    pub fn new(shard: ShardId, directory: PresenceDirectory, max_connections: usize) -> Self {
        Self {
            shard,
            directory,
            connections: DashMap::new(),
            max_connections,
            occupancy: AtomicUsize::new(0),
        }
    }

    /// The shard identity this registry publishes.
    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Look up a local connection.
    pub fn get(&self, recipient: &RecipientId) -> Option<Arc<GatewayConnection>> {
        self.connections.get(recipient).map(|c| c.value().clone())
    }

    /// Register a freshly upgraded connection.
    ///
    /// Publishes presence first: a connection that cannot be found by the
    /// routing layer is refused outright. A recipient reconnecting to this
    /// gateway replaces its previous connection, which is told to close.
    pub async fn register(&self, connection: Arc<GatewayConnection>) -> Result<(), RegisterError> {
        if self
            .occupancy
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| {
                (held < self.max_connections).then_some(held + 1)
            })
            .is_err()
        {
            warn!(limit = self.max_connections, "refusing connection at capacity");
            return Err(RegisterError::AtCapacity {
                limit: self.max_connections,
            });
        }

        if let Err(err) = self
            .directory
            .publish(&connection.recipient, &self.shard)
            .await
        {
            let _ = self.occupancy.fetch_sub(1, Ordering::Relaxed);
            return Err(err.into());
        }

        let recipient = connection.recipient.clone();
        if let Some(previous) = self.connections.insert(recipient.clone(), connection) {
            // Replaced in place; the recipient still holds a single slot.
            let _ = self.occupancy.fetch_sub(1, Ordering::Relaxed);
            debug!(recipient = %recipient, "reconnect replaces previous connection");
            let _ = previous.send(TransportFrame::Close);
        }
        info!(recipient = %recipient, connections = self.connections.len(), "connection registered");
        Ok(())
    }

    /// Record client activity (a pong) for a recipient, if still registered.
    pub fn acknowledge(&self, recipient: &RecipientId) {
        if let Some(connection) = self.connections.get(recipient) {
            connection.mark_alive();
        }
    }

    /// Deliver a payload to a local connection. Returns `false` when the
    /// recipient is not connected here or its channel is saturated.
    pub fn deliver(&self, recipient: &RecipientId, payload: Bytes) -> bool {
        match self.connections.get(recipient) {
            Some(connection) => connection.send(TransportFrame::Payload(payload)),
            None => false,
        }
    }

    /// Tear down a connection after its socket closed.
    ///
    /// Only this exact connection is removed: if the recipient already
    /// reconnected here, the replacement entry (and its directory mapping)
    /// is left alone. Withdrawal failures are logged, not propagated; the
    /// stale mapping ages out on the recipient's next connect.
    pub async fn deregister(&self, connection: &Arc<GatewayConnection>) {
        let recipient = &connection.recipient;
        let removed = self
            .connections
            .remove_if(recipient, |_, current| Arc::ptr_eq(current, connection))
            .is_some();
        if !removed {
            debug!(recipient = %recipient, "connection already replaced, skipping teardown");
            return;
        }
        let _ = self.occupancy.fetch_sub(1, Ordering::Relaxed);

        self.withdraw_presence(recipient).await;
        info!(recipient = %recipient, connections = self.connections.len(), "connection deregistered");
    }

    /// Compare-and-delete this shard's mapping for `recipient`.
    ///
    /// A reconnect can re-publish between the map removal and the delete;
    /// its mapping carries this shard's value, so the delete takes it out
    /// with it. When a live replacement is present, put the mapping back.
    async fn withdraw_presence(&self, recipient: &RecipientId) {
        match self.directory.withdraw(recipient, &self.shard).await {
            Err(err) => {
                warn!(recipient = %recipient, error = %err, "presence withdrawal failed");
            }
            Ok(true) if self.connections.contains_key(recipient) => {
                debug!(recipient = %recipient, "reconnect raced the withdrawal, restoring presence");
                if let Err(err) = self.directory.publish(recipient, &self.shard).await {
                    warn!(recipient = %recipient, error = %err, "presence restore failed");
                }
            }
            Ok(_) => {}
        }
    }

    /// Close every live connection and withdraw its presence.
    ///
    /// Used at shutdown so recipients re-route to another shard instead of
    /// timing out against a dead one. Returns how many were closed.
    pub async fn drain(&self) -> usize {
        let connections: Vec<Arc<GatewayConnection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut closed = 0;
        for connection in connections {
            let recipient = &connection.recipient;
            let removed = self
                .connections
                .remove_if(recipient, |_, current| Arc::ptr_eq(current, &connection))
                .is_some();
            if !removed {
                continue;
            }
            let _ = self.occupancy.fetch_sub(1, Ordering::Relaxed);
            let _ = connection.send(TransportFrame::Close);
            self.withdraw_presence(recipient).await;
            closed += 1;
        }
        closed
    }

    /// One liveness sweep over every connection.
    ///
    /// A connection that has not acknowledged since the previous sweep is
    /// evicted: removed from the map, told to close, and its directory
    /// mapping withdrawn immediately. Everyone else gets a probe and must
    /// answer before the next sweep. Returns the evicted recipients.
    pub async fn sweep(&self) -> Vec<RecipientId> {
        let mut evicted: Vec<Arc<GatewayConnection>> = Vec::new();
        for entry in &self.connections {
            let connection = entry.value();
            if connection.check_alive() {
                let _ = connection.send(TransportFrame::Probe);
            } else {
                evicted.push(connection.clone());
            }
        }

        let mut evicted_ids = Vec::with_capacity(evicted.len());
        for connection in evicted {
            let recipient = &connection.recipient;
            let removed = self
                .connections
                .remove_if(recipient, |_, current| Arc::ptr_eq(current, &connection))
                .is_some();
            if !removed {
                continue;
            }
            let _ = self.occupancy.fetch_sub(1, Ordering::Relaxed);
            let _ = connection.send(TransportFrame::Close);
            self.withdraw_presence(recipient).await;
            info!(
                recipient = %recipient,
                idle = ?connection.last_pong_elapsed(),
                "connection evicted, no pong since last sweep"
            );
            evicted_ids.push(recipient.clone());
        }
        evicted_ids
    }
}
