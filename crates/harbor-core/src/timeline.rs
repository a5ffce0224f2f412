//! Per-channel ordered message collection with insert/merge/dedupe logic.
//!
//! Entries are kept strictly non-decreasing by `(created_at_ms, entry id)`.
//! Confirmed ids are tracked for the lifetime of the timeline, including
//! past the retention trim, so replayed events stay idempotent even after
//! their entry has been trimmed away.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::ids::{MessageId, SendNonce};
use crate::types::{Message, SyncState};

/// Identity of one timeline entry: provisional until reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryId {
    /// Optimistic local send, identified by its client nonce.
    Pending(SendNonce),
    /// Server-confirmed message.
    Confirmed(MessageId),
}

impl EntryId {
    fn sort_token(&self) -> &str {
        match self {
            Self::Pending(nonce) => nonce.as_str(),
            Self::Confirmed(id) => id.as_str(),
        }
    }
}

/// One entry in a channel timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub entry_id: EntryId,
    pub message: Message,
}

impl TimelineEntry {
    fn sort_key(&self) -> (u64, &str) {
        (self.message.created_at_ms, self.entry_id.sort_token())
    }

    /// Whether this entry is an unconfirmed (pending or failed) local send.
    pub fn is_provisional(&self) -> bool {
        matches!(self.entry_id, EntryId::Pending(_))
    }
}

/// Result of applying a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New confirmed entry inserted at its sorted position.
    Inserted,
    /// The confirmed id (or an already-reconciled nonce) was seen before;
    /// the call was a no-op.
    DuplicateIgnored,
    /// A pending entry with a matching nonce was reconciled into this
    /// confirmed message.
    ReconciledPending,
    /// The payload was unusable (confirmed apply without an id); absorbed.
    Rejected,
}

/// Ordered, deduplicated message sequence for one `(server, channel)` scope.
#[derive(Debug, Clone)]
pub struct ChannelTimeline {
    entries: Vec<TimelineEntry>,
    /// Every confirmed id ever applied, retained past trimming.
    confirmed_ids: HashSet<MessageId>,
    /// Explicit nonce -> confirmed-id reconciliation table.
    reconciled: HashMap<SendNonce, MessageId>,
    max_confirmed: usize,
}

impl ChannelTimeline {
    /// Create a timeline with a confirmed-entry retention cap
    /// (`max_confirmed >= 1`). Pending and failed entries never count
    /// against the cap and are never trimmed.
    pub fn new(max_confirmed: usize) -> Self {
        Self {
            entries: Vec::new(),
            confirmed_ids: HashSet::new(),
            reconciled: HashMap::new(),
            max_confirmed: max_confirmed.max(1),
        }
    }

    /// Current entries in display order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Position of a confirmed message in the current sequence.
    ///
    /// `None` when the id is unknown here, including ids trimmed out of
    /// retention and ids from history that has not been loaded.
    pub fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.entry_id == EntryId::Confirmed(id.clone()))
    }

    /// The confirmed id a nonce reconciled into, when it already has.
    pub fn reconciled_id(&self, nonce: &SendNonce) -> Option<&MessageId> {
        self.reconciled.get(nonce)
    }

    /// Insert an optimistic local send at its sorted position.
    ///
    /// `message.sync_state` must be [`SyncState::Pending`]; the entry is
    /// keyed by `nonce` until [`apply_confirmed`](Self::apply_confirmed)
    /// reconciles it.
    pub fn insert_pending(&mut self, nonce: SendNonce, message: Message) {
        let entry = TimelineEntry {
            entry_id: EntryId::Pending(nonce),
            message,
        };
        let at = self.insertion_index(entry.sort_key());
        self.entries.insert(at, entry);
    }

    /// Insert or merge a confirmed message.
    ///
    /// Idempotent on the confirmed id: duplicate events from reconnect or
    /// retry never create a second visible entry. When `nonce` names an
    /// in-flight pending entry, that entry is removed and the confirmed
    /// message takes the position implied by its authoritative
    /// `created_at_ms`.
    pub fn apply_confirmed(
        &mut self,
        message: Message,
        nonce: Option<&SendNonce>,
    ) -> ApplyOutcome {
        let Some(id) = message.id.clone() else {
            warn!("confirmed apply without a message id dropped");
            return ApplyOutcome::Rejected;
        };

        if self.confirmed_ids.contains(&id) {
            debug!(message_id = %id, "duplicate confirmed message ignored");
            return ApplyOutcome::DuplicateIgnored;
        }

        let mut reconciled_pending = false;
        if let Some(nonce) = nonce {
            if let Some(prior) = self.reconciled.get(nonce) {
                // Same logical send already reconciled under a different id.
                warn!(
                    nonce = %nonce,
                    prior_id = %prior,
                    new_id = %id,
                    "nonce already reconciled; duplicate confirmation ignored"
                );
                return ApplyOutcome::DuplicateIgnored;
            }
            if self.remove_pending_entry(nonce) {
                self.reconciled.insert(nonce.clone(), id.clone());
                reconciled_pending = true;
            }
        }

        let entry = TimelineEntry {
            entry_id: EntryId::Confirmed(id.clone()),
            message,
        };
        let at = self.insertion_index(entry.sort_key());
        self.entries.insert(at, entry);
        self.confirmed_ids.insert(id);
        self.trim_confirmed();

        if reconciled_pending {
            ApplyOutcome::ReconciledPending
        } else {
            ApplyOutcome::Inserted
        }
    }

    /// Mark a pending entry failed, retaining it for retry/discard.
    pub fn mark_failed(&mut self, nonce: &SendNonce) -> bool {
        self.set_pending_state(nonce, SyncState::Failed)
    }

    /// Return a failed entry to pending ahead of a retry attempt.
    pub fn mark_retrying(&mut self, nonce: &SendNonce) -> bool {
        self.set_pending_state(nonce, SyncState::Pending)
    }

    /// Remove a provisional entry on explicit discard.
    pub fn remove_pending(&mut self, nonce: &SendNonce) -> bool {
        self.remove_pending_entry(nonce)
    }

    fn set_pending_state(&mut self, nonce: &SendNonce, state: SyncState) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.entry_id == EntryId::Pending(nonce.clone()))
        {
            Some(entry) => {
                entry.message.sync_state = state;
                true
            }
            None => false,
        }
    }

    fn remove_pending_entry(&mut self, nonce: &SendNonce) -> bool {
        match self
            .entries
            .iter()
            .position(|entry| entry.entry_id == EntryId::Pending(nonce.clone()))
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn insertion_index(&self, key: (u64, &str)) -> usize {
        self.entries
            .partition_point(|existing| existing.sort_key() <= key)
    }

    fn trim_confirmed(&mut self) {
        let confirmed = self
            .entries
            .iter()
            .filter(|entry| !entry.is_provisional())
            .count();
        if confirmed <= self.max_confirmed {
            return;
        }

        let mut excess = confirmed - self.max_confirmed;
        self.entries.retain(|entry| {
            if excess > 0 && !entry.is_provisional() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}
