//! The session: single owner of all reconciliation state.
//!
//! One `Session` exists per logical login and owns every per-channel map;
//! UI bindings hold a reference and read derived views, never independent
//! copies. All mutation funnels through the intent methods here, executes
//! synchronously to completion, and fans out [`StateChange`] notifications.
//!
//! Transport completion handlers land back on the session after an await;
//! each re-validates that its scope still exists before applying effects,
//! because the world may have changed during the round trip (channel left,
//! server removed, reconnect occurred).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{CoreError, ErrorCategory};
use crate::events::{AckReceipt, RealtimeEvent, SendReceipt, WireMessage};
use crate::ids::{ChannelId, ChannelKey, MessageId, SendNonce, ServerId, UserUid};
use crate::mentions::{self, AudienceTokens};
use crate::notify::{ChangeKind, ChangeNotifier, ChangeStream, StateChange};
use crate::read_cursor::{CursorApply, CursorTracker};
use crate::retry::RetryPolicy;
use crate::router::{ConnectionState, EventRouter, RouteOutcome};
use crate::send_queue::SendQueue;
use crate::timeline::{ApplyOutcome, ChannelTimeline, EntryId, TimelineEntry};
use crate::typing::{DEFAULT_TYPING_TTL_MS, TypingLedger};
use crate::types::{ChannelBadges, Message, PendingSend, ReadAckCursor, SendDraft, SyncState};

const DEFAULT_TIMELINE_MAX_ENTRIES: usize = 1_200;
const DEFAULT_MAX_BODY_LEN: usize = 4_000;
const DEFAULT_RECENT_EVENT_CAP: usize = 128;
const DEFAULT_REPLAY_BUFFER_CAP: usize = 512;
const DEFAULT_NOTIFY_BUFFER: usize = 256;

/// Construction-time tuning for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub current_user: UserUid,
    /// Capability-declared audience mention tokens.
    pub audience_tokens: AudienceTokens,
    pub typing_ttl_ms: u64,
    /// Confirmed-entry retention cap per channel timeline.
    pub timeline_max_entries: usize,
    pub max_body_len: usize,
    /// Recently-seen event ids remembered per channel by each router.
    pub recent_event_cap: usize,
    /// Events buffered per connection across a reconnect gap.
    pub replay_buffer_cap: usize,
    pub notify_buffer: usize,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn new(current_user: impl Into<UserUid>) -> Self {
        Self {
            current_user: current_user.into(),
            audience_tokens: AudienceTokens::default(),
            typing_ttl_ms: DEFAULT_TYPING_TTL_MS,
            timeline_max_entries: DEFAULT_TIMELINE_MAX_ENTRIES,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            recent_event_cap: DEFAULT_RECENT_EVENT_CAP,
            replay_buffer_cap: DEFAULT_REPLAY_BUFFER_CAP,
            notify_buffer: DEFAULT_NOTIFY_BUFFER,
            retry: RetryPolicy::default(),
        }
    }
}

/// The reconciliation core for one logged-in session.
pub struct Session {
    config: SessionConfig,
    timelines: HashMap<ChannelKey, ChannelTimeline>,
    send_queue: SendQueue,
    cursors: CursorTracker,
    typing: TypingLedger,
    connections: HashMap<ServerId, EventRouter>,
    notifier: ChangeNotifier,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let typing = TypingLedger::new(config.typing_ttl_ms);
        let notifier = ChangeNotifier::new(config.notify_buffer);
        Self {
            config,
            timelines: HashMap::new(),
            send_queue: SendQueue::new(),
            cursors: CursorTracker::new(),
            typing,
            connections: HashMap::new(),
            notifier,
        }
    }

    pub fn current_user(&self) -> &UserUid {
        &self.config.current_user
    }

    /// Subscribe to state change notifications.
    pub fn subscribe_changes(&self) -> ChangeStream {
        self.notifier.subscribe()
    }

    // ---- membership & connection lifecycle ----

    /// Register a channel the user is a member of.
    pub fn join_channel(&mut self, server_id: impl Into<ServerId>, channel_id: impl Into<ChannelId>) {
        let server_id = server_id.into();
        let channel_id = channel_id.into();
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        self.timelines
            .entry(key)
            .or_insert_with(|| ChannelTimeline::new(self.config.timeline_max_entries));
        self.connection_for(server_id).subscribe(channel_id);
    }

    /// The sole cross-cutting cleanup path: purges timeline, cursor,
    /// typing, router subscription and in-flight sends for the scope.
    /// Any network response arriving afterwards is discarded, never
    /// reapplied.
    pub fn leave_channel(&mut self, server_id: &ServerId, channel_id: &ChannelId) {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        info!(channel = %key, "leaving channel, purging scoped state");
        self.timelines.remove(&key);
        self.cursors.remove_channel(&key);
        self.typing.remove_channel(&key);
        if let Some(router) = self.connections.get_mut(server_id) {
            router.unsubscribe(channel_id);
        }
        let invalidated = self.send_queue.remove_channel(&key);
        if !invalidated.is_empty() {
            debug!(
                channel = %key,
                count = invalidated.len(),
                "in-flight sends invalidated by channel removal"
            );
        }
        self.notifier
            .emit(StateChange::channel(key, ChangeKind::Removed));
    }

    pub fn connect_server(&mut self, server_id: &ServerId) -> Result<(), CoreError> {
        let change = StateChange::server(server_id.clone(), ChangeKind::Connection);
        self.connection_for(server_id.clone()).connect()?;
        self.notifier.emit(change);
        Ok(())
    }

    pub fn server_connected(&mut self, server_id: &ServerId) -> Result<(), CoreError> {
        let change = StateChange::server(server_id.clone(), ChangeKind::Connection);
        self.connection_for(server_id.clone()).established()?;
        self.notifier.emit(change);
        Ok(())
    }

    pub fn server_connection_lost(&mut self, server_id: &ServerId) -> Result<(), CoreError> {
        let change = StateChange::server(server_id.clone(), ChangeKind::Connection);
        self.connection_for(server_id.clone()).connection_lost()?;
        self.notifier.emit(change);
        Ok(())
    }

    pub fn server_reconnected(&mut self, server_id: &ServerId) -> Result<(), CoreError> {
        let change = StateChange::server(server_id.clone(), ChangeKind::Connection);
        self.connection_for(server_id.clone()).reestablished()?;
        self.notifier.emit(change);
        Ok(())
    }

    pub fn connection_state(&self, server_id: &ServerId) -> ConnectionState {
        self.connections
            .get(server_id)
            .map(EventRouter::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Whether the server's incremental stream is still untrusted pending
    /// a resync.
    pub fn needs_resync(&self, server_id: &ServerId) -> bool {
        self.connections
            .get(server_id)
            .is_some_and(EventRouter::needs_resync)
    }

    /// Complete a post-gap resync: apply the server-authoritative cursors
    /// unconditionally, then replay the events buffered across the gap
    /// through the normal apply path. Returns the number of replayed
    /// events.
    pub fn complete_resync(
        &mut self,
        server_id: &ServerId,
        cursors: Vec<ReadAckCursor>,
        now_ms: u64,
    ) -> usize {
        for cursor in cursors {
            let key = ChannelKey::new(cursor.server_id.clone(), cursor.channel_id.clone());
            if !self.timelines.contains_key(&key) {
                debug!(channel = %key, "resync cursor for unjoined channel skipped");
                continue;
            }
            self.cursors.resync_from_server(&key, cursor);
            self.notifier
                .emit(StateChange::channel(key, ChangeKind::Badges));
        }

        let Some(router) = self.connections.get_mut(server_id) else {
            return 0;
        };
        let replayed = router.take_resynced();
        let count = replayed.len();
        for event in replayed {
            self.apply_event(event, now_ms);
        }
        count
    }

    // ---- send path ----

    /// Submit a new outgoing message: validates, surfaces an optimistic
    /// pending entry immediately, and returns the nonce to carry through
    /// the send round trip.
    pub fn submit_send(
        &mut self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        draft: SendDraft,
        now_ms: u64,
    ) -> Result<SendNonce, CoreError> {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        if !self.timelines.contains_key(&key) {
            return Err(CoreError::new(
                ErrorCategory::Validation,
                "unknown_channel",
                format!("not a member of {key}"),
            ));
        }
        if draft.body.trim().is_empty() && draft.attachments.is_empty() {
            return Err(CoreError::new(
                ErrorCategory::Validation,
                "empty_message",
                "message has no body and no attachments",
            ));
        }
        if draft.body.len() > self.config.max_body_len {
            return Err(CoreError::message_too_long(
                draft.body.len(),
                self.config.max_body_len,
            ));
        }

        let nonce = self.send_queue.mint_nonce();
        let mentions = mentions::parse_mentions(&draft.body, &self.config.audience_tokens);
        let message = Message {
            id: None,
            server_id: server_id.clone(),
            channel_id: channel_id.clone(),
            author: self.config.current_user.clone(),
            body: draft.body.clone(),
            created_at_ms: now_ms,
            mentions,
            reply_to: draft.reply_to.clone(),
            attachments: draft.attachments.clone(),
            link_previews: Vec::new(),
            sync_state: SyncState::Pending,
        };

        self.send_queue.track(PendingSend {
            nonce: nonce.clone(),
            server_id: server_id.clone(),
            channel_id: channel_id.clone(),
            body: draft.body,
            attachments: draft.attachments,
            reply_to: draft.reply_to,
            submitted_at_ms: now_ms,
            attempts: 0,
        });
        if let Some(timeline) = self.timelines.get_mut(&key) {
            timeline.insert_pending(nonce.clone(), message);
        }

        self.emit_channel(&key, ChangeKind::Timeline);
        self.emit_channel(&key, ChangeKind::SendState);
        Ok(nonce)
    }

    /// Completion handler for a successful send round trip.
    ///
    /// Late completions (the nonce no longer outstanding because the
    /// channel was left or the send was discarded) are dropped here.
    pub fn resolve_send(&mut self, nonce: &SendNonce, receipt: SendReceipt) {
        let Some(send) = self.send_queue.resolve(nonce) else {
            debug!(nonce = %nonce, "late send resolution discarded");
            return;
        };
        let key = ChannelKey::new(send.server_id.clone(), send.channel_id.clone());
        let Some(timeline) = self.timelines.get_mut(&key) else {
            debug!(nonce = %nonce, channel = %key, "send resolution for removed channel discarded");
            return;
        };

        let mentions = mentions::parse_mentions(&send.body, &self.config.audience_tokens);
        let message = Message {
            id: Some(receipt.message_id),
            server_id: send.server_id,
            channel_id: send.channel_id,
            author: self.config.current_user.clone(),
            body: send.body,
            created_at_ms: receipt.created_at_ms,
            mentions,
            reply_to: send.reply_to,
            attachments: send.attachments,
            link_previews: Vec::new(),
            sync_state: SyncState::Confirmed,
        };
        let outcome = timeline.apply_confirmed(message, Some(nonce));
        debug!(nonce = %nonce, ?outcome, "send resolved");

        self.emit_channel(&key, ChangeKind::Timeline);
        self.emit_channel(&key, ChangeKind::SendState);
    }

    /// Completion handler for a failed send round trip. The optimistic
    /// entry flips to failed and stays visible for retry or discard.
    pub fn fail_send(&mut self, nonce: &SendNonce, error: CoreError) {
        let Some(send) = self.send_queue.get(nonce).cloned() else {
            debug!(nonce = %nonce, code = %error.code, "late send failure discarded");
            return;
        };
        let key = ChannelKey::new(send.server_id, send.channel_id);
        warn!(nonce = %nonce, code = %error.code, channel = %key, "send failed");
        self.send_queue.fail(nonce, error);
        if let Some(timeline) = self.timelines.get_mut(&key) {
            timeline.mark_failed(nonce);
        }
        self.emit_channel(&key, ChangeKind::Timeline);
        self.emit_channel(&key, ChangeKind::SendState);
    }

    /// Put a failed send back in flight. Returns the record to resubmit.
    pub fn retry_send(&mut self, nonce: &SendNonce) -> Option<PendingSend> {
        let send = self.send_queue.retry(nonce)?.clone();
        let key = ChannelKey::new(send.server_id.clone(), send.channel_id.clone());
        if let Some(timeline) = self.timelines.get_mut(&key) {
            timeline.mark_retrying(nonce);
        }
        self.emit_channel(&key, ChangeKind::Timeline);
        self.emit_channel(&key, ChangeKind::SendState);
        Some(send)
    }

    /// Drop a failed send for good.
    pub fn discard_send(&mut self, nonce: &SendNonce) {
        let Some(send) = self.send_queue.discard(nonce) else {
            return;
        };
        let key = ChannelKey::new(send.server_id, send.channel_id);
        if let Some(timeline) = self.timelines.get_mut(&key) {
            timeline.remove_pending(nonce);
        }
        self.emit_channel(&key, ChangeKind::Timeline);
        self.emit_channel(&key, ChangeKind::SendState);
    }

    /// Backoff before the next retry of a failed send, when one is still
    /// worth offering.
    pub fn next_retry_delay(&self, nonce: &SendNonce) -> Option<Duration> {
        let send = self.send_queue.get(nonce)?;
        let error = self.send_queue.failure(nonce)?;
        self.config.retry.next_delay(send.attempts, error)
    }

    // ---- read state ----

    /// Mark the channel read up to its newest confirmed message,
    /// optimistically, without waiting for the server ack.
    pub fn mark_channel_read(
        &mut self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        now_ms: u64,
    ) -> Option<MessageId> {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        let timeline = self.timelines.get(&key)?;
        let newest = timeline
            .entries()
            .iter()
            .rev()
            .find_map(|entry| match &entry.entry_id {
                EntryId::Confirmed(id) => Some(id.clone()),
                EntryId::Pending(_) => None,
            })?;

        let outcome =
            self.cursors
                .advance_optimistic(&key, newest.clone(), now_ms, self.timelines.get(&key));
        if outcome != CursorApply::StaleDropped {
            self.emit_channel(&key, ChangeKind::Badges);
        }
        Some(newest)
    }

    /// Completion handler for the read-ack round trip.
    pub fn reconcile_read_ack(
        &mut self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        receipt: AckReceipt,
    ) {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        if !self.timelines.contains_key(&key) {
            debug!(channel = %key, "read ack for removed channel discarded");
            return;
        }
        let cursor = ReadAckCursor {
            server_id: server_id.clone(),
            channel_id: channel_id.clone(),
            last_read_message_id: receipt.last_read_message_id,
            acked_at_ms: receipt.acked_at_ms,
        };
        let outcome = self
            .cursors
            .reconcile(&key, cursor, self.timelines.get(&key));
        if outcome == CursorApply::Applied {
            self.emit_channel(&key, ChangeKind::Badges);
        }
    }

    // ---- realtime ingestion ----

    /// Feed one inbound realtime event through the server's router.
    pub fn handle_realtime(&mut self, event: RealtimeEvent, now_ms: u64) {
        let server_id = event.scope().0.clone();
        let Some(router) = self.connections.get_mut(&server_id) else {
            warn!(server = %server_id, "event for unknown server dropped");
            return;
        };
        match router.route(event) {
            RouteOutcome::Dispatch(event) => self.apply_event(event, now_ms),
            RouteOutcome::Buffered
            | RouteOutcome::DuplicateDropped
            | RouteOutcome::UnsubscribedDropped
            | RouteOutcome::Unroutable => {}
        }
    }

    /// Record a typing heartbeat (local composer or remote user).
    pub fn mark_typing(
        &mut self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        user: UserUid,
        now_ms: u64,
    ) {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        self.typing.mark_typing(&key, user, now_ms);
        self.emit_channel(&key, ChangeKind::Typing);
    }

    fn apply_event(&mut self, event: RealtimeEvent, now_ms: u64) {
        match event {
            RealtimeEvent::MessageCreated {
                server_id,
                channel_id,
                message,
                ..
            } => self.apply_remote_message(server_id, channel_id, message),
            RealtimeEvent::ReadAckUpdated {
                server_id,
                channel_id,
                last_read_message_id,
                acked_at_ms,
                ..
            } => self.reconcile_read_ack(
                &server_id,
                &channel_id,
                AckReceipt {
                    last_read_message_id,
                    acked_at_ms,
                    applied: None,
                },
            ),
            RealtimeEvent::TypingUpdated {
                server_id,
                channel_id,
                user,
                ..
            } => self.mark_typing(&server_id, &channel_id, user, now_ms),
        }
    }

    fn apply_remote_message(
        &mut self,
        server_id: ServerId,
        channel_id: ChannelId,
        wire: WireMessage,
    ) {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        let Some(timeline) = self.timelines.get_mut(&key) else {
            debug!(channel = %key, "remote message for unjoined channel dropped");
            return;
        };

        // A tracked nonce on the wire means this is the echo of our own
        // in-flight send: confirmation, not a new message.
        let echo_nonce = wire
            .nonce
            .clone()
            .filter(|nonce| self.send_queue.contains(nonce) || timeline.reconciled_id(nonce).is_some());

        let message = Message {
            id: Some(wire.id),
            server_id,
            channel_id,
            author: wire.author,
            body: wire.body,
            created_at_ms: wire.created_at_ms,
            mentions: wire.mentions,
            reply_to: wire.reply_to,
            attachments: wire.attachments,
            link_previews: wire.link_previews,
            sync_state: SyncState::Confirmed,
        };

        let outcome = timeline.apply_confirmed(message, echo_nonce.as_ref());
        if outcome == ApplyOutcome::ReconciledPending
            && let Some(nonce) = &echo_nonce
        {
            debug!(nonce = %nonce, "self-echo confirmed in-flight send");
            self.send_queue.resolve(nonce);
            self.emit_channel(&key, ChangeKind::SendState);
        }
        if outcome != ApplyOutcome::DuplicateIgnored && outcome != ApplyOutcome::Rejected {
            self.emit_channel(&key, ChangeKind::Timeline);
        }
    }

    // ---- derived views ----

    /// Ordered timeline entries for a channel; empty when not joined.
    pub fn timeline(&self, server_id: &ServerId, channel_id: &ChannelId) -> &[TimelineEntry] {
        self.timelines
            .get(&ChannelKey::new(server_id.clone(), channel_id.clone()))
            .map(ChannelTimeline::entries)
            .unwrap_or(&[])
    }

    /// Unread/mention badge pair for one channel.
    pub fn channel_badges(&self, server_id: &ServerId, channel_id: &ChannelId) -> ChannelBadges {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        let Some(timeline) = self.timelines.get(&key) else {
            return ChannelBadges::default();
        };
        mentions::channel_badges(
            timeline,
            self.cursors.cursor(&key),
            &self.config.current_user,
            &self.config.audience_tokens,
        )
    }

    /// Per-server aggregate: always the sum over that server's channels.
    pub fn server_badges(&self, server_id: &ServerId) -> ChannelBadges {
        self.timelines
            .keys()
            .filter(|key| key.server_id == *server_id)
            .map(|key| self.channel_badges(&key.server_id, &key.channel_id))
            .fold(ChannelBadges::default(), ChannelBadges::merge)
    }

    /// Users currently typing in a channel.
    pub fn typing_users(
        &mut self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        now_ms: u64,
    ) -> Vec<UserUid> {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        self.typing.typing_users(&key, now_ms)
    }

    /// Whether a send in the channel is still awaiting its round trip.
    pub fn send_in_progress(&self, server_id: &ServerId, channel_id: &ChannelId) -> bool {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        self.send_queue.has_in_flight(&key)
    }

    /// Most recent send failure in the channel, for the composer surface.
    pub fn last_send_error(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Option<(&SendNonce, &CoreError)> {
        let key = ChannelKey::new(server_id.clone(), channel_id.clone());
        self.send_queue.last_channel_failure(&key)
    }

    pub fn read_cursor(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Option<&ReadAckCursor> {
        self.cursors
            .cursor(&ChannelKey::new(server_id.clone(), channel_id.clone()))
    }

    fn connection_for(&mut self, server_id: ServerId) -> &mut EventRouter {
        let recent_cap = self.config.recent_event_cap;
        let replay_cap = self.config.replay_buffer_cap;
        self.connections
            .entry(server_id.clone())
            .or_insert_with(|| EventRouter::new(server_id, recent_cap, replay_cap))
    }

    fn emit_channel(&self, key: &ChannelKey, kind: ChangeKind) {
        self.notifier.emit(StateChange::channel(key.clone(), kind));
    }
}
