//! Reconciliation core for a live, multi-server chat timeline.
//!
//! This crate merges optimistic local sends and out-of-order realtime
//! delivery into ordered, deduplicated per-channel timelines, and derives
//! unread/mention badges from a monotonic, server-authoritative read
//! cursor. It is framework-free: rendering consumes the derived views and
//! the change stream, transport feeds in wire events and receipts.

/// Stable error taxonomy and HTTP classification.
pub mod error;
/// Wire payloads: realtime events and round-trip receipts.
pub mod events;
/// Typed identifiers and channel scoping.
pub mod ids;
/// Mention parsing and badge derivation.
pub mod mentions;
/// Change-notification bus for derived state.
pub mod notify;
/// Monotonic per-channel read cursors.
pub mod read_cursor;
/// Backoff policy for retryable send failures.
pub mod retry;
/// Connection lifecycle and realtime event routing.
pub mod router;
/// In-flight optimistic send tracking.
pub mod send_queue;
/// The session object owning all reconciliation state.
pub mod session;
/// Per-channel ordered message storage.
pub mod timeline;
/// Ephemeral typing membership.
pub mod typing;
/// Canonical data model.
pub mod types;

pub use error::{CoreError, ErrorCategory, classify_http_status};
pub use events::{AckReceipt, RealtimeEvent, SendReceipt, WireMessage};
pub use ids::{ChannelId, ChannelKey, MessageId, SendNonce, ServerId, UserUid};
pub use mentions::{AudienceTokens, channel_badges, mentions_user, parse_mentions};
pub use notify::{ChangeKind, ChangeNotifier, ChangeScope, ChangeStream, StateChange};
pub use read_cursor::{CursorApply, CursorTracker};
pub use retry::RetryPolicy;
pub use router::{ConnectionState, EventRouter, RouteOutcome};
pub use send_queue::SendQueue;
pub use session::{Session, SessionConfig};
pub use timeline::{ApplyOutcome, ChannelTimeline, EntryId, TimelineEntry};
pub use typing::{DEFAULT_TYPING_TTL_MS, TypingLedger};
pub use types::{
    Attachment, ChannelBadges, LinkPreview, MentionEntity, MentionKind, Message, PendingSend,
    ReadAckCursor, SendDraft, SyncState, TypingEntry,
};
