//! Outbound send orchestration: directory lookup, per-shard grouping,
//! envelope encoding, queue push, per-recipient result reporting.

use std::collections::HashMap;

use bytes::Bytes;
use crossbar_core::{Envelope, RecipientId, ShardId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::directory::PresenceDirectory;
use crate::errors::RouteError;
use crate::queue::ShardQueue;

/// Final state of one recipient in a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The envelope was enqueued to the recipient's shard.
    Delivered,
    /// The recipient has no known shard (offline or directory miss).
    NotFound,
    /// The presence directory could not be consulted; retry with backoff.
    DirectoryUnavailable,
    /// The recipient's shard queue could not be reached; retry with backoff.
    QueueUnavailable,
}

/// Per-recipient outcome of one [`Router::send`] call, in input order.
///
/// A sender always gets the full picture — never a single boolean.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SendReport {
    results: Vec<(RecipientId, DeliveryStatus)>,
}

impl SendReport {
    fn new(targets: Vec<RecipientId>, statuses: Vec<DeliveryStatus>) -> Self {
        debug_assert_eq!(targets.len(), statuses.len());
        Self {
            results: targets.into_iter().zip(statuses).collect(),
        }
    }

    /// All per-recipient results, in the order the targets were given.
    pub fn results(&self) -> &[(RecipientId, DeliveryStatus)] {
        &self.results
    }

    /// Status for one recipient, if it was a target of this send.
    pub fn status_of(&self, recipient: &RecipientId) -> Option<DeliveryStatus> {
        self.results
            .iter()
            .find(|(r, _)| r == recipient)
            .map(|(_, s)| *s)
    }

    /// Number of recipients whose envelope was enqueued.
    pub fn delivered(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, s)| *s == DeliveryStatus::Delivered)
            .count()
    }

    /// Whether every recipient was delivered.
    pub fn all_delivered(&self) -> bool {
        self.delivered() == self.results.len()
    }
}

/// Send targets: one recipient or an ordered set.
#[derive(Clone, Debug)]
pub enum SendTargets {
    /// A single recipient.
    One(RecipientId),
    /// An ordered set of recipients.
    Many(Vec<RecipientId>),
}

impl SendTargets {
    fn into_vec(self) -> Vec<RecipientId> {
        match self {
            Self::One(r) => vec![r],
            Self::Many(rs) => rs,
        }
    }
}

impl From<RecipientId> for SendTargets {
    fn from(r: RecipientId) -> Self {
        Self::One(r)
    }
}

impl From<&str> for SendTargets {
    fn from(r: &str) -> Self {
        Self::One(RecipientId::from(r))
    }
}

impl From<Vec<RecipientId>> for SendTargets {
    fn from(rs: Vec<RecipientId>) -> Self {
        Self::Many(rs)
    }
}

/// Routes messages to the shards that own their recipients' connections.
///
/// Many sends may be in flight at once over the shared directory and queue
/// clients; each call suspends only at the lookup and push boundaries.
#[derive(Clone)]
pub struct Router {
    directory: PresenceDirectory,
    queue: ShardQueue,
}

impl Router {
    /// Create a router over shared directory and queue clients.
    pub fn new(directory: PresenceDirectory, queue: ShardQueue) -> Self {
        Self { directory, queue }
    }

    /// Deliver `message` to every recipient in `targets`.
    ///
    /// Per-recipient failures never abort the call: recipients with no
    /// directory entry are reported [`DeliveryStatus::NotFound`] and the rest
    /// still go out; a failed shard push marks only that shard's recipients
    /// [`DeliveryStatus::QueueUnavailable`]. The only errors returned are an
    /// empty target list and an unencodable message.
    pub async fn send(
        &self,
        message: Bytes,
        targets: impl Into<SendTargets>,
    ) -> Result<SendReport, RouteError> {
        let targets = targets.into().into_vec();
        if targets.is_empty() {
            return Err(RouteError::EmptyTargets);
        }

        let resolutions = match self.directory.lookup_many(&targets).await {
            Ok(resolutions) => resolutions,
            Err(err) => {
                warn!(error = %err, targets = targets.len(), "directory lookup failed, deferring send");
                let statuses = vec![DeliveryStatus::DirectoryUnavailable; targets.len()];
                return Ok(SendReport::new(targets, statuses));
            }
        };

        // Group resolved recipients by shard, preserving first-appearance
        // shard order and input order within each group.
        let mut statuses = vec![DeliveryStatus::NotFound; targets.len()];
        let mut groups: Vec<(ShardId, Vec<RecipientId>)> = Vec::new();
        let mut group_index: HashMap<ShardId, usize> = HashMap::new();
        let mut member_group: Vec<Option<usize>> = vec![None; targets.len()];

        for (i, resolution) in resolutions.iter().enumerate() {
            let Some(shard) = resolution else {
                debug!(recipient = %targets[i], "no presence entry, reporting not found");
                continue;
            };
            let idx = *group_index.entry(shard.clone()).or_insert_with(|| {
                groups.push((shard.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[idx].1.push(targets[i].clone());
            member_group[i] = Some(idx);
        }

        if groups.is_empty() {
            return Ok(SendReport::new(targets, statuses));
        }

        // One envelope per destination shard.
        let mut batch = Vec::with_capacity(groups.len());
        for (shard, recipients) in &groups {
            let envelope = Envelope::new(message.clone(), recipients.clone())?;
            batch.push((shard.clone(), envelope.encode()?));
        }

        // `Ok` per group index means that shard's push was accepted.
        let group_outcomes: Vec<bool> = if batch.len() == 1 {
            let (shard, frame) = batch.into_iter().next().unwrap_or_else(|| unreachable!());
            match self.queue.push_one(&shard, frame).await {
                Ok(()) => vec![true],
                Err(err) => {
                    warn!(shard = %shard, error = %err, "envelope push failed");
                    vec![false]
                }
            }
        } else {
            match self.queue.push_many(batch).await {
                Ok(outcomes) => outcomes
                    .into_iter()
                    .map(|(shard, outcome)| {
                        if let Err(err) = &outcome {
                            warn!(shard = %shard, error = %err, "envelope push failed");
                        }
                        outcome.is_ok()
                    })
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "multi-push failed for every shard");
                    vec![false; groups.len()]
                }
            }
        };

        for (i, group) in member_group.iter().enumerate() {
            if let Some(idx) = group {
                statuses[i] = if group_outcomes[*idx] {
                    DeliveryStatus::Delivered
                } else {
                    DeliveryStatus::QueueUnavailable
                };
            }
        }

        let report = SendReport::new(targets, statuses);
        debug!(
            delivered = report.delivered(),
            total = report.results().len(),
            shards = groups.len(),
            "send complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use crossbar_core::Envelope;

    use crate::directory::{DirectoryStore, MemoryDirectory, MockDirectoryStore};
    use crate::errors::StoreUnavailable;
    use crate::queue::{MemoryQueue, MockQueueTransport, QueueTransport};

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        queue: Arc<MemoryQueue>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MemoryDirectory::new());
        let queue = Arc::new(MemoryQueue::new());
        let router = Router::new(
            PresenceDirectory::with_timeout(directory.clone(), Duration::from_millis(100)),
            ShardQueue::with_timeout(queue.clone(), Duration::from_millis(100)),
        );
        Fixture {
            directory,
            queue,
            router,
        }
    }

    async fn seed(fx: &Fixture, recipient: &str, shard: &str) {
        fx.directory
            .put(&recipient.into(), &shard.into())
            .await
            .unwrap();
    }

    async fn pop_envelope(fx: &Fixture, shard: &str) -> Envelope {
        let frame = fx.queue.pop(&shard.into()).await.unwrap().expect("queued frame");
        Envelope::decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn single_recipient_end_to_end() {
        let fx = fixture();
        seed(&fx, "u1", "shard-a").await;

        let report = fx
            .router
            .send(Bytes::from_static(b"hello"), "u1")
            .await
            .unwrap();

        assert_eq!(report.status_of(&"u1".into()), Some(DeliveryStatus::Delivered));
        let env = pop_envelope(&fx, "shard-a").await;
        assert_eq!(&env.message[..], b"hello");
        assert_eq!(env.targets, vec![RecipientId::from("u1")]);
    }

    #[tokio::test]
    async fn two_shards_get_one_envelope_each() {
        let fx = fixture();
        seed(&fx, "u1", "shard-a").await;
        seed(&fx, "u2", "shard-b").await;

        let report = fx
            .router
            .send(
                Bytes::from_static(b"hi"),
                vec![RecipientId::from("u1"), RecipientId::from("u2")],
            )
            .await
            .unwrap();

        assert!(report.all_delivered());
        let env_a = pop_envelope(&fx, "shard-a").await;
        assert_eq!(env_a.targets, vec![RecipientId::from("u1")]);
        let env_b = pop_envelope(&fx, "shard-b").await;
        assert_eq!(env_b.targets, vec![RecipientId::from("u2")]);
        // Exactly one envelope per shard.
        assert_eq!(fx.queue.depth(&"shard-a".into()), 0);
        assert_eq!(fx.queue.depth(&"shard-b".into()), 0);
    }

    #[tokio::test]
    async fn cohabiting_recipients_share_one_envelope() {
        let fx = fixture();
        seed(&fx, "u1", "shard-a").await;
        seed(&fx, "u2", "shard-a").await;
        seed(&fx, "u3", "shard-a").await;

        let report = fx
            .router
            .send(
                Bytes::from_static(b"m"),
                vec![
                    RecipientId::from("u3"),
                    RecipientId::from("u1"),
                    RecipientId::from("u2"),
                ],
            )
            .await
            .unwrap();

        assert!(report.all_delivered());
        assert_eq!(fx.queue.depth(&"shard-a".into()), 1);
        let env = pop_envelope(&fx, "shard-a").await;
        // Input order preserved within the group.
        let order: Vec<&str> = env.targets.iter().map(RecipientId::as_str).collect();
        assert_eq!(order, vec!["u3", "u1", "u2"]);
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found_and_nothing_is_pushed() {
        let fx = fixture();

        let report = fx
            .router
            .send(Bytes::from_static(b"x"), "u3")
            .await
            .unwrap();

        assert_eq!(report.status_of(&"u3".into()), Some(DeliveryStatus::NotFound));
        assert_eq!(fx.queue.depth(&"shard-a".into()), 0);
    }

    #[tokio::test]
    async fn partial_failure_still_delivers_known_recipients() {
        let fx = fixture();
        seed(&fx, "x", "s1").await;

        let report = fx
            .router
            .send(
                Bytes::from_static(b"m"),
                vec![RecipientId::from("x"), RecipientId::from("y")],
            )
            .await
            .unwrap();

        assert_eq!(report.status_of(&"x".into()), Some(DeliveryStatus::Delivered));
        assert_eq!(report.status_of(&"y".into()), Some(DeliveryStatus::NotFound));
        // X's envelope was still enqueued, and names only X.
        let env = pop_envelope(&fx, "s1").await;
        assert_eq!(env.targets, vec![RecipientId::from("x")]);
    }

    #[tokio::test]
    async fn empty_targets_is_a_contract_violation() {
        let fx = fixture();
        let err = fx
            .router
            .send(Bytes::from_static(b"m"), Vec::<RecipientId>::new())
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::EmptyTargets);
    }

    #[tokio::test]
    async fn report_preserves_input_order() {
        let fx = fixture();
        seed(&fx, "b", "s1").await;
        seed(&fx, "a", "s2").await;

        let report = fx
            .router
            .send(
                Bytes::from_static(b"m"),
                vec![RecipientId::from("b"), RecipientId::from("a")],
            )
            .await
            .unwrap();

        let order: Vec<&str> = report.results().iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn directory_outage_defers_every_recipient() {
        let mut store = MockDirectoryStore::new();
        let _ = store
            .expect_get_many()
            .returning(|_| Err(StoreUnavailable("connection reset".into())));

        let queue = Arc::new(MemoryQueue::new());
        let router = Router::new(
            PresenceDirectory::with_timeout(Arc::new(store), Duration::from_millis(100)),
            ShardQueue::with_timeout(queue.clone(), Duration::from_millis(100)),
        );

        let report = router
            .send(
                Bytes::from_static(b"m"),
                vec![RecipientId::from("u1"), RecipientId::from("u2")],
            )
            .await
            .unwrap();

        for (_, status) in report.results() {
            assert_eq!(*status, DeliveryStatus::DirectoryUnavailable);
        }
        assert_eq!(queue.depth(&"s1".into()), 0);
    }

    #[tokio::test]
    async fn queue_outage_marks_only_that_shard() {
        // s1 accepts, s2 fails: u1 delivered, u2 deferred.
        let directory = Arc::new(MemoryDirectory::new());
        directory.put(&"u1".into(), &"s1".into()).await.unwrap();
        directory.put(&"u2".into(), &"s2".into()).await.unwrap();

        let mut transport = MockQueueTransport::new();
        let _ = transport.expect_push_many().returning(|batch| {
            Ok(batch
                .iter()
                .map(|(shard, _)| {
                    if shard.as_str() == "s2" {
                        Err(StoreUnavailable("unreachable".into()))
                    } else {
                        Ok(())
                    }
                })
                .collect())
        });

        let router = Router::new(
            PresenceDirectory::with_timeout(directory, Duration::from_millis(100)),
            ShardQueue::with_timeout(Arc::new(transport), Duration::from_millis(100)),
        );

        let report = router
            .send(
                Bytes::from_static(b"m"),
                vec![RecipientId::from("u1"), RecipientId::from("u2")],
            )
            .await
            .unwrap();

        assert_eq!(report.status_of(&"u1".into()), Some(DeliveryStatus::Delivered));
        assert_eq!(
            report.status_of(&"u2".into()),
            Some(DeliveryStatus::QueueUnavailable)
        );
    }

    #[tokio::test]
    async fn single_shard_push_failure_defers_its_recipients() {
        let directory = Arc::new(MemoryDirectory::new());
        directory.put(&"u1".into(), &"s1".into()).await.unwrap();

        let mut transport = MockQueueTransport::new();
        let _ = transport
            .expect_push()
            .returning(|_, _| Err(StoreUnavailable("down".into())));

        let router = Router::new(
            PresenceDirectory::with_timeout(directory, Duration::from_millis(100)),
            ShardQueue::with_timeout(Arc::new(transport), Duration::from_millis(100)),
        );

        let report = router
            .send(Bytes::from_static(b"m"), "u1")
            .await
            .unwrap();
        assert_eq!(
            report.status_of(&"u1".into()),
            Some(DeliveryStatus::QueueUnavailable)
        );
    }

    #[tokio::test]
    async fn same_shard_sends_stay_fifo() {
        let fx = fixture();
        seed(&fx, "u1", "s1").await;

        fx.router
            .send(Bytes::from_static(b"first"), "u1")
            .await
            .unwrap();
        fx.router
            .send(Bytes::from_static(b"second"), "u1")
            .await
            .unwrap();

        assert_eq!(&pop_envelope(&fx, "s1").await.message[..], b"first");
        assert_eq!(&pop_envelope(&fx, "s1").await.message[..], b"second");
    }

    #[tokio::test]
    async fn message_bytes_pass_through_untouched() {
        let fx = fixture();
        seed(&fx, "u1", "s1").await;
        let payload: Vec<u8> = (0..64).map(|i| i * 3).collect();

        fx.router
            .send(Bytes::from(payload.clone()), "u1")
            .await
            .unwrap();

        assert_eq!(&pop_envelope(&fx, "s1").await.message[..], &payload[..]);
    }

    #[test]
    fn send_report_serializes_per_recipient() {
        let report = SendReport::new(
            vec![RecipientId::from("u1"), RecipientId::from("u2")],
            vec![DeliveryStatus::Delivered, DeliveryStatus::NotFound],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json[0][0], "u1");
        assert_eq!(json[0][1], "delivered");
        assert_eq!(json[1][1], "not_found");
    }
}
