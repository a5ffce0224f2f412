//! Per-channel monotonic read position.
//!
//! The cursor only ever moves forward in timeline order. Ordering is judged
//! by timeline position, never by wall clock, since client and server
//! clocks may skew. A cursor referencing history that is not loaded locally
//! is stored verbatim; position resolution takes over once that history
//! loads.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::ids::{ChannelKey, MessageId};
use crate::timeline::ChannelTimeline;
use crate::types::ReadAckCursor;

/// Result of a cursor update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorApply {
    /// The cursor moved (or was set for the first time).
    Applied,
    /// Same position; only the ack timestamp was refreshed.
    Unchanged,
    /// The update resolved to a strictly earlier timeline position and was
    /// dropped.
    StaleDropped,
}

/// Tracks the read cursor for every `(server, channel)` scope.
#[derive(Debug, Default)]
pub struct CursorTracker {
    cursors: HashMap<ChannelKey, ReadAckCursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self, key: &ChannelKey) -> Option<&ReadAckCursor> {
        self.cursors.get(key)
    }

    /// Advance the cursor locally when the user views a channel, without
    /// waiting for server confirmation. Subject to the same monotonic rule
    /// as server updates.
    pub fn advance_optimistic(
        &mut self,
        key: &ChannelKey,
        message_id: MessageId,
        now_ms: u64,
        timeline: Option<&ChannelTimeline>,
    ) -> CursorApply {
        let cursor = ReadAckCursor {
            server_id: key.server_id.clone(),
            channel_id: key.channel_id.clone(),
            last_read_message_id: message_id,
            acked_at_ms: now_ms,
        };
        self.apply_monotonic(key, cursor, timeline, "optimistic advance")
    }

    /// Apply a server ack. Overwrites the local cursor only when the server
    /// cursor is at or ahead of the current position in timeline order; an
    /// ack that resolves strictly earlier (replayed after a newer local
    /// advance) is dropped.
    pub fn reconcile(
        &mut self,
        key: &ChannelKey,
        server_cursor: ReadAckCursor,
        timeline: Option<&ChannelTimeline>,
    ) -> CursorApply {
        self.apply_monotonic(key, server_cursor, timeline, "server ack")
    }

    /// Unconditional overwrite after a connection gap: the server is
    /// authoritative over any optimistic cursor accumulated while
    /// disconnected.
    pub fn resync_from_server(&mut self, key: &ChannelKey, server_cursor: ReadAckCursor) {
        debug!(
            channel = %key,
            message_id = %server_cursor.last_read_message_id,
            "cursor resynced from server"
        );
        self.cursors.insert(key.clone(), server_cursor);
    }

    /// Purge cursor state for a removed channel.
    pub fn remove_channel(&mut self, key: &ChannelKey) {
        self.cursors.remove(key);
    }

    fn apply_monotonic(
        &mut self,
        key: &ChannelKey,
        incoming: ReadAckCursor,
        timeline: Option<&ChannelTimeline>,
        source: &str,
    ) -> CursorApply {
        let Some(current) = self.cursors.get(key) else {
            self.cursors.insert(key.clone(), incoming);
            return CursorApply::Applied;
        };

        if current.last_read_message_id == incoming.last_read_message_id {
            let refreshed = ReadAckCursor {
                acked_at_ms: current.acked_at_ms.max(incoming.acked_at_ms),
                ..incoming
            };
            self.cursors.insert(key.clone(), refreshed);
            return CursorApply::Unchanged;
        }

        if is_regression(timeline, current, &incoming) {
            // A replay/ordering anomaly, not a user mistake: log and drop.
            warn!(
                channel = %key,
                current = %current.last_read_message_id,
                incoming = %incoming.last_read_message_id,
                source,
                "stale_read_ack: cursor regression dropped"
            );
            return CursorApply::StaleDropped;
        }

        self.cursors.insert(key.clone(), incoming);
        CursorApply::Applied
    }
}

/// A regression is only provable when both cursor messages resolve to
/// positions in the local timeline. With either side unresolved (history
/// not loaded), the update is taken at the server's word.
fn is_regression(
    timeline: Option<&ChannelTimeline>,
    current: &ReadAckCursor,
    incoming: &ReadAckCursor,
) -> bool {
    let Some(timeline) = timeline else {
        return false;
    };
    match (
        timeline.position_of(&current.last_read_message_id),
        timeline.position_of(&incoming.last_read_message_id),
    ) {
        (Some(current_pos), Some(incoming_pos)) => incoming_pos < current_pos,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ChannelId, ServerId, UserUid};
    use crate::types::{Message, SyncState};

    fn timeline_with(ids: &[&str]) -> ChannelTimeline {
        let mut timeline = ChannelTimeline::new(100);
        for (index, id) in ids.iter().enumerate() {
            timeline.apply_confirmed(
                Message {
                    id: Some(MessageId::new(*id)),
                    server_id: ServerId::new("srv-a"),
                    channel_id: ChannelId::new("general"),
                    author: UserUid::new("u-bob"),
                    body: String::new(),
                    created_at_ms: (index as u64 + 1) * 100,
                    mentions: Vec::new(),
                    reply_to: None,
                    attachments: Vec::new(),
                    link_previews: Vec::new(),
                    sync_state: SyncState::Confirmed,
                },
                None,
            );
        }
        timeline
    }

    fn ack(id: &str, acked_at_ms: u64) -> ReadAckCursor {
        ReadAckCursor {
            server_id: ServerId::new("srv-a"),
            channel_id: ChannelId::new("general"),
            last_read_message_id: MessageId::new(id),
            acked_at_ms,
        }
    }

    fn key() -> ChannelKey {
        ChannelKey::new("srv-a", "general")
    }

    #[test]
    fn first_cursor_is_always_applied() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2"]);
        assert_eq!(
            tracker.reconcile(&key(), ack("m1", 1_000), Some(&timeline)),
            CursorApply::Applied
        );
    }

    #[test]
    fn stale_ack_is_rejected_by_position() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2", "m3", "m4", "m5"]);
        tracker.reconcile(&key(), ack("m5", 1_000), Some(&timeline));

        // Network reorder delivers an older ack afterwards.
        assert_eq!(
            tracker.reconcile(&key(), ack("m3", 2_000), Some(&timeline)),
            CursorApply::StaleDropped
        );
        assert_eq!(
            tracker.cursor(&key()).map(|c| c.last_read_message_id.as_str()),
            Some("m5")
        );
    }

    #[test]
    fn wall_clock_never_decides_staleness() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2"]);
        // The newer position arrives with an older wall-clock timestamp
        // (skewed server clock); position wins.
        tracker.reconcile(&key(), ack("m1", 5_000), Some(&timeline));
        assert_eq!(
            tracker.reconcile(&key(), ack("m2", 1_000), Some(&timeline)),
            CursorApply::Applied
        );
    }

    #[test]
    fn same_position_refreshes_ack_time_only() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1"]);
        tracker.reconcile(&key(), ack("m1", 1_000), Some(&timeline));
        assert_eq!(
            tracker.reconcile(&key(), ack("m1", 3_000), Some(&timeline)),
            CursorApply::Unchanged
        );
        assert_eq!(tracker.cursor(&key()).map(|c| c.acked_at_ms), Some(3_000));

        // A replayed older ack for the same id must not move time backwards.
        tracker.reconcile(&key(), ack("m1", 2_000), Some(&timeline));
        assert_eq!(tracker.cursor(&key()).map(|c| c.acked_at_ms), Some(3_000));
    }

    #[test]
    fn unresolved_positions_accept_the_server_cursor() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2"]);
        tracker.reconcile(&key(), ack("m2", 1_000), Some(&timeline));

        // Cursor for history not loaded locally: stored verbatim.
        assert_eq!(
            tracker.reconcile(&key(), ack("m0-old", 2_000), Some(&timeline)),
            CursorApply::Applied
        );
        assert_eq!(
            tracker.cursor(&key()).map(|c| c.last_read_message_id.as_str()),
            Some("m0-old")
        );
    }

    #[test]
    fn optimistic_advance_is_monotonic_too() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2", "m3"]);
        tracker.advance_optimistic(&key(), MessageId::new("m3"), 1_000, Some(&timeline));
        assert_eq!(
            tracker.advance_optimistic(&key(), MessageId::new("m1"), 2_000, Some(&timeline)),
            CursorApply::StaleDropped
        );
    }

    #[test]
    fn resync_overwrites_unconditionally() {
        let mut tracker = CursorTracker::new();
        let timeline = timeline_with(&["m1", "m2", "m3"]);
        tracker.advance_optimistic(&key(), MessageId::new("m3"), 1_000, Some(&timeline));

        // After a gap the server is authoritative, even backwards.
        tracker.resync_from_server(&key(), ack("m1", 2_000));
        assert_eq!(
            tracker.cursor(&key()).map(|c| c.last_read_message_id.as_str()),
            Some("m1")
        );
    }

    #[test]
    fn remove_channel_purges_cursor() {
        let mut tracker = CursorTracker::new();
        tracker.resync_from_server(&key(), ack("m1", 1_000));
        tracker.remove_channel(&key());
        assert!(tracker.cursor(&key()).is_none());
    }
}
