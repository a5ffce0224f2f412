//! Ephemeral per-channel typing membership.
//!
//! Entries expire on a fixed TTL and are pruned lazily on read; nothing
//! here is persisted or fanned out. Callers pass `now_ms` explicitly so
//! expiry is deterministic under test.

use std::collections::HashMap;

use crate::ids::{ChannelKey, UserUid};
use crate::types::TypingEntry;

/// Refresh window for a typing heartbeat, mirroring composer behavior.
pub const DEFAULT_TYPING_TTL_MS: u64 = 2_500;

/// Per-channel typing indicator state.
#[derive(Debug)]
pub struct TypingLedger {
    entries: HashMap<ChannelKey, Vec<TypingEntry>>,
    ttl_ms: u64,
}

impl TypingLedger {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_ms: ttl_ms.max(1),
        }
    }

    /// Insert or refresh a typing entry for `user`.
    pub fn mark_typing(&mut self, key: &ChannelKey, user: UserUid, now_ms: u64) {
        let expires_at_ms = now_ms + self.ttl_ms;
        let entries = self.entries.entry(key.clone()).or_default();
        match entries.iter_mut().find(|entry| entry.user == user) {
            Some(entry) => entry.expires_at_ms = expires_at_ms,
            None => entries.push(TypingEntry {
                user,
                expires_at_ms,
            }),
        }
    }

    /// Users currently typing in a channel, pruning expired entries.
    pub fn typing_users(&mut self, key: &ChannelKey, now_ms: u64) -> Vec<UserUid> {
        let Some(entries) = self.entries.get_mut(key) else {
            return Vec::new();
        };
        entries.retain(|entry| entry.expires_at_ms > now_ms);
        entries.iter().map(|entry| entry.user.clone()).collect()
    }

    /// Drop expired entries across all channels.
    pub fn sweep(&mut self, now_ms: u64) {
        for entries in self.entries.values_mut() {
            entries.retain(|entry| entry.expires_at_ms > now_ms);
        }
        self.entries.retain(|_, entries| !entries.is_empty());
    }

    /// Purge typing state for a removed channel.
    pub fn remove_channel(&mut self, key: &ChannelKey) {
        self.entries.remove(key);
    }
}
