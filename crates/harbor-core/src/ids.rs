//! Typed identifiers and their scoping rules.
//!
//! Every piece of per-channel state in the core is keyed by [`ChannelKey`],
//! never by a bare channel id: identical channel-id strings under two
//! different servers are unrelated scopes.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// An independently administered backend the user has joined.
    ///
    /// The primary isolation boundary: no core operation reads or writes
    /// across a `ServerId` implicitly.
    ServerId
);

string_id!(
    /// A conversation scope within one server.
    ChannelId
);

string_id!(
    /// Server-assigned identifier of a confirmed message.
    MessageId
);

string_id!(
    /// Opaque per-user identifier disclosed to a server.
    UserUid
);

string_id!(
    /// Client-generated provisional identifier carried through a send
    /// round trip until the server assigns a [`MessageId`].
    SendNonce
);

/// Fully qualified channel scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
}

impl ChannelKey {
    pub fn new(server_id: impl Into<ServerId>, channel_id: impl Into<ChannelId>) -> Self {
        Self {
            server_id: server_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_id, self.channel_id)
    }
}
