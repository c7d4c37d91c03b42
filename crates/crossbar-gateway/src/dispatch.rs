//! Shard queue dispatcher: drains this gateway's queue and fans envelopes
//! out to their local connections.

use std::sync::Arc;
use std::time::Duration;

use crossbar_core::Envelope;
use crossbar_router::ShardQueue;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::ConnectionRegistry;

/// Drain the registry's shard queue until cancelled.
///
/// Frames are popped one at a time and decoded; each target named in the
/// envelope gets a copy over its local connection. A target that hung up
/// between lookup and delivery is logged and skipped. An undecodable frame
/// is dropped; it can never become deliverable. On an empty queue or a queue
/// fault the loop waits `poll` before retrying.
pub async fn run_dispatcher(
    registry: Arc<ConnectionRegistry>,
    queue: ShardQueue,
    poll: Duration,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("dispatcher cancelled");
            return;
        }

        match queue.pop(registry.shard()).await {
            Ok(Some(frame)) => {
                dispatch_frame(&registry, &frame);
                continue; // keep draining while the queue has frames
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "shard queue pop failed");
            }
        }

        tokio::select! {
            () = time::sleep(poll) => {}
            () = cancel.cancelled() => {
                debug!("dispatcher cancelled");
                return;
            }
        }
    }
}

fn dispatch_frame(registry: &ConnectionRegistry, frame: &[u8]) {
    let envelope = match Envelope::decode(frame) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, bytes = frame.len(), "dropping undecodable frame");
            return;
        }
    };

    for target in &envelope.targets {
        if registry.deliver(target, envelope.message.clone()) {
            debug!(recipient = %target, bytes = envelope.message.len(), "delivered");
        } else {
            debug!(recipient = %target, "recipient no longer connected here");
        }
    }
}
