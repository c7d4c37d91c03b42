//! Queue envelope and its binary codec.
//!
//! An [`Envelope`] pairs an opaque message with the ordered set of recipients
//! it is addressed to on one shard. The wire form is length-prefixed and
//! self-describing so the producing router and the consuming gateway need no
//! schema coordination beyond this module:
//!
//! ```text
//! [u8 version][u32 LE message_len][message]
//! [u16 LE target_count] { [u16 LE target_len][target utf-8] }*
//! ```
//!
//! `decode(encode(x)) == x` for every envelope `encode` accepts.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::ids::RecipientId;

/// Current envelope wire version.
const VERSION: u8 = 1;

/// Errors produced by the envelope codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Version byte did not match any version this build understands.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// Input ended before a declared field was complete.
    #[error("envelope truncated")]
    Truncated,

    /// An envelope must address at least one recipient.
    #[error("envelope has no targets")]
    EmptyTargets,

    /// A target ID was not valid UTF-8.
    #[error("target id is not valid utf-8")]
    InvalidTarget,

    /// A field exceeded its length prefix's range.
    #[error("{0} exceeds the wire limit")]
    FieldTooLarge(&'static str),

    /// Well-formed envelope followed by garbage.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
}

/// One message addressed to an ordered set of recipients on a single shard.
///
/// The message is opaque: the routing layer never inspects or mutates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Opaque message payload.
    pub message: Bytes,
    /// Recipients, in the order the sender listed them. Never empty.
    pub targets: Vec<RecipientId>,
}

impl Envelope {
    /// Create an envelope, rejecting an empty target list.
    pub fn new(message: Bytes, targets: Vec<RecipientId>) -> Result<Self, CodecError> {
        if targets.is_empty() {
            return Err(CodecError::EmptyTargets);
        }
        Ok(Self { message, targets })
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        if self.targets.is_empty() {
            return Err(CodecError::EmptyTargets);
        }
        if self.message.len() > u32::MAX as usize {
            return Err(CodecError::FieldTooLarge("message"));
        }
        if self.targets.len() > usize::from(u16::MAX) {
            return Err(CodecError::FieldTooLarge("target count"));
        }

        let mut buf = BytesMut::with_capacity(1 + 4 + self.message.len() + 2);
        buf.put_u8(VERSION);
        buf.put_u32_le(self.message.len() as u32);
        buf.put_slice(&self.message);
        buf.put_u16_le(self.targets.len() as u16);
        for target in &self.targets {
            let raw = target.as_str().as_bytes();
            if raw.len() > usize::from(u16::MAX) {
                return Err(CodecError::FieldTooLarge("target id"));
            }
            buf.put_u16_le(raw.len() as u16);
            buf.put_slice(raw);
        }
        Ok(buf.freeze())
    }

    /// Deserialize from the wire form.
    ///
    /// Fails on truncated or corrupt input, and on trailing bytes: an
    /// envelope occupies a whole queue frame, so leftover data means the
    /// producer and consumer disagree about the format.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut buf = data;

        if buf.remaining() < 1 {
            return Err(CodecError::Truncated);
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        if buf.remaining() < 4 {
            return Err(CodecError::Truncated);
        }
        let message_len = buf.get_u32_le() as usize;
        if buf.remaining() < message_len {
            return Err(CodecError::Truncated);
        }
        let message = Bytes::copy_from_slice(&buf[..message_len]);
        buf.advance(message_len);

        if buf.remaining() < 2 {
            return Err(CodecError::Truncated);
        }
        let count = buf.get_u16_le();
        if count == 0 {
            return Err(CodecError::EmptyTargets);
        }

        let mut targets = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            if buf.remaining() < 2 {
                return Err(CodecError::Truncated);
            }
            let len = usize::from(buf.get_u16_le());
            if buf.remaining() < len {
                return Err(CodecError::Truncated);
            }
            let raw = std::str::from_utf8(&buf[..len]).map_err(|_| CodecError::InvalidTarget)?;
            targets.push(RecipientId::from(raw));
            buf.advance(len);
        }

        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }

        Ok(Self { message, targets })
    }
}
