//! Per-connection state shared between the registry, the sweeper, and the
//! socket tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbar_core::RecipientId;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A frame handed to a connection's socket write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// Application payload, delivered to the client as a binary message.
    Payload(Bytes),
    /// Liveness probe, delivered as a protocol ping.
    Probe,
    /// Ask the write task to close the socket.
    Close,
}

/// One live WebSocket connection owned by this gateway.
pub struct GatewayConnection {
    /// Recipient this connection authenticates as.
    pub recipient: RecipientId,
    /// Send channel to the connection's socket write task.
    tx: mpsc::Sender<TransportFrame>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last sweep.
    pub is_alive: AtomicBool,
    /// When the last pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of frames dropped due to a full channel.
    pub dropped_frames: AtomicU64,
}

impl GatewayConnection {
    /// Create a new connection in the alive state.
    pub fn new(recipient: RecipientId, tx: mpsc::Sender<TransportFrame>) -> Self {
        let now = Instant::now();
        Self {
            recipient,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Hand a frame to the write task.
    ///
    /// Returns `false` if the channel is full or closed, and increments the
    /// dropped frame counter.
    pub fn send(&self, frame: TransportFrame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or other client activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the sweep.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Build a connection plus the receiving half of its write channel.
pub fn connection_pair(
    recipient: RecipientId,
    buffer: usize,
) -> (Arc<GatewayConnection>, mpsc::Receiver<TransportFrame>) {
    let (tx, rx) = mpsc::channel(buffer);
    (Arc::new(GatewayConnection::new(recipient, tx)), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (Arc<GatewayConnection>, mpsc::Receiver<TransportFrame>) {
        connection_pair("u1".into(), 32)
    }

    #[test]
    fn new_connection_is_alive() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.recipient.as_str(), "u1");
        assert!(conn.is_alive.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn send_payload_reaches_write_task() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(TransportFrame::Payload(Bytes::from_static(b"hi"))));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, TransportFrame::Payload(Bytes::from_static(b"hi")));
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(!conn.send(TransportFrame::Probe));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = GatewayConnection::new("u2".into(), tx);
        assert!(conn.send(TransportFrame::Probe));
        assert!(!conn.send(TransportFrame::Probe));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn mark_alive_refreshes_last_pong() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        conn.mark_alive();
        assert!(conn.last_pong_elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > age1);
    }
}
