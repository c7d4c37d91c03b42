//! # crossbar-core
//!
//! Leaf types shared across the crossbar routing layer.
//!
//! - Branded ID newtypes ([`RecipientId`], [`ShardId`])
//! - The queue [`Envelope`] and its length-prefixed binary codec
//! - The codec error type ([`CodecError`])

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;

pub use envelope::{CodecError, Envelope};
pub use ids::{RecipientId, ShardId};
