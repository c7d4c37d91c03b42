//! Shard queues: the transport between gateways.
//!
//! Every shard owns one named queue; routers append encoded envelopes to it
//! and the owning gateway drains it. [`QueueTransport`] is the seam to the
//! shared queue service, [`ShardQueue`] the timeout-bounded client over it.
//!
//! Ordering: pushes from one client instance to one shard are FIFO. Nothing
//! is promised across shards or across client instances.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crossbar_core::ShardId;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{QueueError, StoreUnavailable};

/// Queue operations the routing layer requires of its backing service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Append one frame to the named shard's queue (at-least-once).
    async fn push(&self, shard: &ShardId, frame: Bytes) -> Result<(), StoreUnavailable>;

    /// Append to several shard queues in one logical multi-push.
    ///
    /// The result is aligned with the batch: one outcome per entry. A backend
    /// with cross-queue transactions reports uniform outcomes; one without
    /// reports each push independently. Only a transport-wide fault may fail
    /// the call as a whole.
    async fn push_many(
        &self,
        batch: &[(ShardId, Bytes)],
    ) -> Result<Vec<Result<(), StoreUnavailable>>, StoreUnavailable>;

    /// Take the oldest frame off the named shard's queue, if any.
    async fn pop(&self, shard: &ShardId) -> Result<Option<Bytes>, StoreUnavailable>;
}

/// In-memory [`QueueTransport`] for single-process deployments and tests.
///
/// One mutex over all queues makes `push_many` atomic: either every frame of
/// a batch is enqueued or (on a panic-free path) none observably is.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<ShardId, VecDeque<Bytes>>>,
}

impl MemoryQueue {
    /// Create an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames currently queued for a shard.
    pub fn depth(&self, shard: &ShardId) -> usize {
        self.queues.lock().get(shard).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn push(&self, shard: &ShardId, frame: Bytes) -> Result<(), StoreUnavailable> {
        self.queues
            .lock()
            .entry(shard.clone())
            .or_default()
            .push_back(frame);
        Ok(())
    }

    async fn push_many(
        &self,
        batch: &[(ShardId, Bytes)],
    ) -> Result<Vec<Result<(), StoreUnavailable>>, StoreUnavailable> {
        let mut queues = self.queues.lock();
        for (shard, frame) in batch {
            queues
                .entry(shard.clone())
                .or_default()
                .push_back(frame.clone());
        }
        Ok(batch.iter().map(|_| Ok(())).collect())
    }

    async fn pop(&self, shard: &ShardId) -> Result<Option<Bytes>, StoreUnavailable> {
        Ok(self
            .queues
            .lock()
            .get_mut(shard)
            .and_then(VecDeque::pop_front))
    }
}

/// Default per-operation timeout for queue calls.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Client over a [`QueueTransport`] with bounded, fallible operations.
#[derive(Clone)]
pub struct ShardQueue {
    transport: Arc<dyn QueueTransport>,
    op_timeout: Duration,
}

impl ShardQueue {
    /// Create a client with the default operation timeout.
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_OP_TIMEOUT)
    }

    /// Create a client with a caller-specified operation timeout.
    pub fn with_timeout(transport: Arc<dyn QueueTransport>, op_timeout: Duration) -> Self {
        Self {
            transport,
            op_timeout,
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreUnavailable>> + Send,
    ) -> Result<T, QueueError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(QueueError::Unavailable(fault.0)),
            Err(_) => Err(QueueError::Unavailable(format!(
                "timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// Push one envelope frame to one shard's queue.
    pub async fn push_one(&self, shard: &ShardId, frame: Bytes) -> Result<(), QueueError> {
        debug!(shard = %shard, bytes = frame.len(), "push envelope");
        self.bounded(self.transport.push(shard, frame)).await
    }

    /// Push envelope frames to several shards, reporting the outcome per
    /// shard in batch order. A transport-wide fault fails the whole call.
    pub async fn push_many(
        &self,
        batch: Vec<(ShardId, Bytes)>,
    ) -> Result<Vec<(ShardId, Result<(), QueueError>)>, QueueError> {
        debug!(shards = batch.len(), "multi-push envelopes");
        let outcomes = self.bounded(self.transport.push_many(&batch)).await?;
        Ok(batch
            .into_iter()
            .map(|(shard, _)| shard)
            .zip(outcomes)
            .map(|(shard, outcome)| {
                (
                    shard,
                    outcome.map_err(|fault| QueueError::Unavailable(fault.0)),
                )
            })
            .collect())
    }

    /// Take the oldest frame off a shard's queue, if any.
    pub async fn pop(&self, shard: &ShardId) -> Result<Option<Bytes>, QueueError> {
        self.bounded(self.transport.pop(shard)).await
    }
}
