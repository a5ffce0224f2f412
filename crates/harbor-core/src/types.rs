//! Canonical data model owned by the reconciliation core.
//!
//! The core holds the only authoritative in-memory copy of all of these;
//! UI layers consume derived read-only views.

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, SendNonce, ServerId, UserUid};

/// Synchronization state of a timeline message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Rendered optimistically, not yet confirmed by the server.
    Pending,
    /// Carried a server-assigned id and authoritative timestamp.
    Confirmed,
    /// Send failed; retained for user-visible retry or discard.
    Failed,
}

/// Kind of a structured mention inside a message body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    /// Targets one user by UID.
    User,
    /// Audience token addressing the whole channel (`@here`, `@channel`,
    /// or any capability-declared equivalent).
    Channel,
}

/// A structured reference within a message targeting a user or audience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MentionEntity {
    pub kind: MentionKind,
    /// Raw token as written, including the leading `@`.
    pub token: String,
    /// Target UID for `User` mentions; `None` for audience tokens.
    pub target: Option<UserUid>,
    /// Display form shown in place of the token.
    pub display_text: String,
    /// Byte range of the token within the message body.
    pub range: (usize, usize),
}

/// Attachment payload carried opaquely on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub source: String,
}

/// Unfurled link preview carried opaquely on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// One chat message as held in a channel timeline.
///
/// Identity: unique by `id` once confirmed. While pending, the message is
/// identified by the [`SendNonce`] tracked in the send queue and the
/// timeline's pending entry; `id` is `None` until reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub author: UserUid,
    pub body: String,
    /// Milliseconds since the Unix epoch. Authoritative (server-assigned)
    /// once confirmed; the local submit time while pending.
    pub created_at_ms: u64,
    pub mentions: Vec<MentionEntity>,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<Attachment>,
    pub link_previews: Vec<LinkPreview>,
    pub sync_state: SyncState,
}

/// User intent payload for a new outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendDraft {
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<MessageId>,
}

impl SendDraft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachments: Vec::new(),
            reply_to: None,
        }
    }
}

/// An in-flight optimistic send.
///
/// Lifecycle: created on submit, then either reconciled into a confirmed
/// [`Message`] (removed) or marked failed. Failed sends are retained until
/// explicit retry or discard, never removed automatically, so user input
/// is not silently lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub nonce: SendNonce,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<MessageId>,
    pub submitted_at_ms: u64,
    /// Completed delivery attempts, drives retry backoff.
    pub attempts: u32,
}

/// Server-acknowledged "read up to here" marker for one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadAckCursor {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub last_read_message_id: MessageId,
    pub acked_at_ms: u64,
}

/// Ephemeral typing indicator entry; pruned by expiry, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user: UserUid,
    pub expires_at_ms: u64,
}

/// Per-channel unread/mention badge pair derived from timeline + cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelBadges {
    /// Messages positioned after the read cursor.
    pub unread: usize,
    /// Post-cursor messages whose mentions target the current user or a
    /// recognized audience token.
    pub mentions: usize,
}

impl ChannelBadges {
    pub fn merge(self, other: ChannelBadges) -> ChannelBadges {
        ChannelBadges {
            unread: self.unread + other.unread,
            mentions: self.mentions + other.mentions,
        }
    }
}
