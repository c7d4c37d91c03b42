//! Error types for directory lookups, queue pushes, and routing.
//!
//! The split follows the failure taxonomy of the routing layer: a recipient
//! with no directory entry is an expected per-recipient outcome, a store that
//! cannot be reached is a transient fault the caller may retry, and an empty
//! target list is a programmer error that fails fast.

use crossbar_core::RecipientId;
use thiserror::Error;

/// A backing store (directory or queue) could not be reached, timed out, or
/// answered with a fault.
///
/// This is the only error a [`DirectoryStore`](crate::directory::DirectoryStore)
/// or [`QueueTransport`](crate::queue::QueueTransport) implementation may
/// produce; "key absent" is data, not an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StoreUnavailable(pub String);

/// Errors from the presence directory client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The recipient has no known shard (offline or never connected).
    #[error("recipient not found: {0}")]
    NotFound(RecipientId),

    /// The directory store could not be reached or the operation timed out.
    /// Never degraded to per-key `NotFound`: "unknown" must not be reported
    /// as "offline".
    #[error("presence directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the shard queue client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue service could not be reached or the operation timed out.
    #[error("shard queue unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`Router::send`](crate::router::Router::send) itself.
///
/// Per-recipient failures are reported in the
/// [`SendReport`](crate::router::SendReport), never here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// `send` was called with an empty target list.
    #[error("send called with an empty target list")]
    EmptyTargets,

    /// The message could not be encoded into an envelope (e.g. it exceeds
    /// the wire limits). Fatal to this message only.
    #[error(transparent)]
    Codec(#[from] crossbar_core::CodecError),
}
