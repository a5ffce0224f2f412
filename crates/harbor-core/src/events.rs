//! Wire payloads exchanged with the transport layer.
//!
//! Realtime stream events are internally tagged by a `type` field
//! (`message.created`, `read_ack.updated`, `typing.updated`); unknown types
//! fail deserialization at the transport edge and never reach the router.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, ServerId, UserUid};
use crate::types::{Attachment, LinkPreview, MentionEntity, SyncState};

/// Message payload as delivered by the realtime stream.
///
/// Mirrors [`crate::types::Message`] minus the locally derived
/// `sync_state`; remote messages are confirmed by definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub id: MessageId,
    pub author: UserUid,
    pub body: String,
    pub created_at_ms: u64,
    #[serde(default)]
    pub mentions: Vec<MentionEntity>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub link_previews: Vec<LinkPreview>,
    /// Client nonce echoed back when this event is the sender's own send
    /// (self-echo); lets the core treat it as confirmation rather than a
    /// new message.
    #[serde(default)]
    pub nonce: Option<crate::ids::SendNonce>,
}

/// One inbound realtime stream event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    /// A message was created in a channel.
    #[serde(rename = "message.created")]
    MessageCreated {
        /// Stable per-event identifier used for duplicate shortcutting.
        event_id: String,
        server_id: ServerId,
        channel_id: ChannelId,
        message: WireMessage,
    },
    /// The server-side read cursor for a channel moved.
    #[serde(rename = "read_ack.updated")]
    ReadAckUpdated {
        event_id: String,
        server_id: ServerId,
        channel_id: ChannelId,
        last_read_message_id: MessageId,
        acked_at_ms: u64,
    },
    /// A user started (or refreshed) typing in a channel.
    #[serde(rename = "typing.updated")]
    TypingUpdated {
        event_id: String,
        server_id: ServerId,
        channel_id: ChannelId,
        user: UserUid,
    },
}

impl RealtimeEvent {
    /// Stable identifier carried by every event.
    pub fn event_id(&self) -> &str {
        match self {
            Self::MessageCreated { event_id, .. }
            | Self::ReadAckUpdated { event_id, .. }
            | Self::TypingUpdated { event_id, .. } => event_id,
        }
    }

    /// Scope the event applies to.
    pub fn scope(&self) -> (&ServerId, &ChannelId) {
        match self {
            Self::MessageCreated {
                server_id,
                channel_id,
                ..
            }
            | Self::ReadAckUpdated {
                server_id,
                channel_id,
                ..
            }
            | Self::TypingUpdated {
                server_id,
                channel_id,
                ..
            } => (server_id, channel_id),
        }
    }
}

/// Response body of `POST /channels/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub created_at_ms: u64,
    pub sync_state: SyncState,
}

/// Response body of the `PUT` read-ack endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckReceipt {
    pub last_read_message_id: MessageId,
    pub acked_at_ms: u64,
    /// Whether the server applied the ack (`false` when it already held a
    /// newer cursor).
    #[serde(default)]
    pub applied: Option<bool>,
}
