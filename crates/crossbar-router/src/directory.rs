//! Presence directory: which shard owns a recipient's live connection.
//!
//! [`DirectoryStore`] is the seam to the shared key-value service; the
//! routing layer only needs four operations over it and treats the wire
//! protocol as opaque. [`PresenceDirectory`] is the client the router and
//! gateway use: it bounds every operation with a timeout and maps store
//! faults to [`DirectoryError::Unavailable`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbar_core::{RecipientId, ShardId};
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::{DirectoryError, StoreUnavailable};

/// Key-value operations the presence directory requires of its backing store.
///
/// At most one shard per recipient at any instant; writes are last-writer-wins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Read one mapping. `None` means unknown/offline.
    async fn get(&self, recipient: &RecipientId) -> Result<Option<ShardId>, StoreUnavailable>;

    /// Read many mappings in a single atomic snapshot: one result per input,
    /// positionally aligned, with no torn view across the batch even under
    /// concurrent writers.
    async fn get_many(
        &self,
        recipients: &[RecipientId],
    ) -> Result<Vec<Option<ShardId>>, StoreUnavailable>;

    /// Write a mapping, replacing any previous shard for this recipient.
    async fn put(&self, recipient: &RecipientId, shard: &ShardId) -> Result<(), StoreUnavailable>;

    /// Remove the mapping only if its current value is `shard`.
    ///
    /// Returns `true` when an entry was removed. A mapping overwritten by a
    /// reconnect to another shard is left untouched.
    async fn remove_if(
        &self,
        recipient: &RecipientId,
        shard: &ShardId,
    ) -> Result<bool, StoreUnavailable>;
}

/// In-memory [`DirectoryStore`] for single-process deployments and tests.
///
/// A single `RwLock` over the whole table gives `get_many` its atomic
/// snapshot for free: the batch is read under one guard.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<RecipientId, ShardId>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently mapped.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the directory has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn get(&self, recipient: &RecipientId) -> Result<Option<ShardId>, StoreUnavailable> {
        Ok(self.entries.read().get(recipient).cloned())
    }

    async fn get_many(
        &self,
        recipients: &[RecipientId],
    ) -> Result<Vec<Option<ShardId>>, StoreUnavailable> {
        let entries = self.entries.read();
        Ok(recipients.iter().map(|r| entries.get(r).cloned()).collect())
    }

    async fn put(&self, recipient: &RecipientId, shard: &ShardId) -> Result<(), StoreUnavailable> {
        let _ = self
            .entries
            .write()
            .insert(recipient.clone(), shard.clone());
        Ok(())
    }

    async fn remove_if(
        &self,
        recipient: &RecipientId,
        shard: &ShardId,
    ) -> Result<bool, StoreUnavailable> {
        let mut entries = self.entries.write();
        if entries.get(recipient) == Some(shard) {
            let _ = entries.remove(recipient);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Default per-operation timeout for directory calls.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Client over a [`DirectoryStore`] with bounded, fallible operations.
#[derive(Clone)]
pub struct PresenceDirectory {
    store: Arc<dyn DirectoryStore>,
    op_timeout: Duration,
}

impl PresenceDirectory {
    /// Create a client with the default operation timeout.
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self::with_timeout(store, DEFAULT_OP_TIMEOUT)
    }

    /// Create a client with a caller-specified operation timeout.
    pub fn with_timeout(store: Arc<dyn DirectoryStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    /// Run a store operation under the client timeout, folding both timeouts
    /// and store faults into [`DirectoryError::Unavailable`].
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreUnavailable>> + Send,
    ) -> Result<T, DirectoryError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(DirectoryError::Unavailable(fault.0)),
            Err(_) => Err(DirectoryError::Unavailable(format!(
                "timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// Resolve one recipient to its owning shard.
    ///
    /// No internal retry; the caller decides what a miss means.
    pub async fn lookup_one(&self, recipient: &RecipientId) -> Result<ShardId, DirectoryError> {
        self.bounded(self.store.get(recipient))
            .await?
            .ok_or_else(|| DirectoryError::NotFound(recipient.clone()))
    }

    /// Resolve many recipients in one atomic read.
    ///
    /// The result has exactly one entry per input recipient, in input order;
    /// `None` marks a recipient with no known shard. A store fault aborts the
    /// whole lookup.
    pub async fn lookup_many(
        &self,
        recipients: &[RecipientId],
    ) -> Result<Vec<Option<ShardId>>, DirectoryError> {
        let resolved = self.bounded(self.store.get_many(recipients)).await?;
        debug_assert_eq!(resolved.len(), recipients.len());
        Ok(resolved)
    }

    /// Publish this shard as the owner of a recipient's connection.
    pub async fn publish(
        &self,
        recipient: &RecipientId,
        shard: &ShardId,
    ) -> Result<(), DirectoryError> {
        debug!(recipient = %recipient, shard = %shard, "publish presence");
        self.bounded(self.store.put(recipient, shard)).await
    }

    /// Withdraw a recipient's mapping, but only if it still points at
    /// `shard` (compare-and-delete). Returns whether an entry was removed.
    pub async fn withdraw(
        &self,
        recipient: &RecipientId,
        shard: &ShardId,
    ) -> Result<bool, DirectoryError> {
        let removed = self.bounded(self.store.remove_if(recipient, shard)).await?;
        debug!(recipient = %recipient, shard = %shard, removed, "withdraw presence");
        Ok(removed)
    }
}
