//! Branded ID newtypes.
//!
//! Recipient and shard identifiers are both opaque strings on the wire, so
//! each gets its own newtype to keep a recipient from ever being used as a
//! queue name (or vice versa). A [`RecipientId`] is assigned by the auth
//! layer and stable across reconnects; a [`ShardId`] names one gateway
//! process and is the value stored in the presence directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

opaque_id! {
    /// Identifies a connected user/endpoint. Directory key.
    RecipientId
}

opaque_id! {
    /// Identifies one gateway process. Directory value and queue name.
    ShardId
}

impl ShardId {
    /// Generate a fresh shard ID (UUID v7, time-ordered) for a process that
    /// was not given one in its configuration.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}
