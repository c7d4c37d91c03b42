//! # crossbar-router
//!
//! The routing layer of the gateway fleet: resolves recipients to the shard
//! that owns their connection and hands envelopes to that shard's queue.
//!
//! - Presence directory client: single and atomic batch lookup, publish,
//!   compare-and-delete withdraw
//! - Shard queue client: single and multi-shard push with per-shard outcomes
//! - Router: fan-out, per-shard envelope grouping, per-recipient reporting

#![deny(unsafe_code)]

pub mod directory;
pub mod errors;
pub mod queue;
pub mod router;

pub use directory::{DirectoryStore, MemoryDirectory, PresenceDirectory};
pub use errors::{DirectoryError, QueueError, RouteError, StoreUnavailable};
pub use queue::{MemoryQueue, QueueTransport, ShardQueue};
pub use router::{DeliveryStatus, Router, SendReport, SendTargets};
