//! In-flight optimistic send tracking.
//!
//! Nonces are minted from a session-local counter; the send round trip
//! carries them out and back so confirmations reconcile against the right
//! optimistic entry. Failed sends stay tracked, with their reason, until
//! the user retries or discards them.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::ids::{ChannelKey, SendNonce};
use crate::types::PendingSend;

/// Tracks every outstanding optimistic send for one session.
#[derive(Debug, Default)]
pub struct SendQueue {
    next_nonce: u64,
    in_flight: HashMap<SendNonce, PendingSend>,
    failures: HashMap<SendNonce, CoreError>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next client nonce.
    pub fn mint_nonce(&mut self) -> SendNonce {
        self.next_nonce += 1;
        SendNonce::new(format!("send-{}", self.next_nonce))
    }

    /// Track a freshly submitted send.
    pub fn track(&mut self, send: PendingSend) {
        debug!(nonce = %send.nonce, channel = %send.channel_id, "tracking pending send");
        self.in_flight.insert(send.nonce.clone(), send);
    }

    pub fn get(&self, nonce: &SendNonce) -> Option<&PendingSend> {
        self.in_flight.get(nonce)
    }

    /// Whether this nonce belongs to an outstanding send of this session.
    ///
    /// Used for self-echo detection: a remote `message.created` carrying a
    /// tracked nonce is a confirmation, not a new message.
    pub fn contains(&self, nonce: &SendNonce) -> bool {
        self.in_flight.contains_key(nonce)
    }

    /// Remove a send on confirmation, returning its record.
    pub fn resolve(&mut self, nonce: &SendNonce) -> Option<PendingSend> {
        self.failures.remove(nonce);
        self.in_flight.remove(nonce)
    }

    /// Mark a send failed, retaining it for retry/discard.
    ///
    /// Returns `false` when the nonce is not tracked (already resolved or
    /// discarded), in which case the failure is dropped.
    pub fn fail(&mut self, nonce: &SendNonce, error: CoreError) -> bool {
        let Some(send) = self.in_flight.get_mut(nonce) else {
            warn!(nonce = %nonce, code = %error.code, "failure for unknown send dropped");
            return false;
        };
        send.attempts += 1;
        self.failures.insert(nonce.clone(), error);
        true
    }

    /// Clear the failure state ahead of a retry attempt.
    ///
    /// Returns the tracked record so the caller can resubmit it.
    pub fn retry(&mut self, nonce: &SendNonce) -> Option<&PendingSend> {
        if self.failures.remove(nonce).is_none() {
            return None;
        }
        self.in_flight.get(nonce)
    }

    /// Drop a failed send on explicit user discard.
    pub fn discard(&mut self, nonce: &SendNonce) -> Option<PendingSend> {
        self.failures.remove(nonce);
        self.in_flight.remove(nonce)
    }

    /// Last failure recorded for a nonce, when it is in the failed state.
    pub fn failure(&self, nonce: &SendNonce) -> Option<&CoreError> {
        self.failures.get(nonce)
    }

    /// Whether any send in the channel is still awaiting its round trip.
    ///
    /// Failed sends are parked, not in progress.
    pub fn has_in_flight(&self, key: &ChannelKey) -> bool {
        self.in_flight.iter().any(|(nonce, send)| {
            send.server_id == key.server_id
                && send.channel_id == key.channel_id
                && !self.failures.contains_key(nonce)
        })
    }

    /// Most recent failure in the channel, for the UI's last-send-error
    /// surface.
    pub fn last_channel_failure(&self, key: &ChannelKey) -> Option<(&SendNonce, &CoreError)> {
        self.failures
            .iter()
            .filter_map(|(nonce, error)| {
                self.in_flight
                    .get(nonce)
                    .filter(|send| {
                        send.server_id == key.server_id && send.channel_id == key.channel_id
                    })
                    .map(|send| (send.submitted_at_ms, nonce, error))
            })
            .max_by_key(|(submitted_at_ms, ..)| *submitted_at_ms)
            .map(|(_, nonce, error)| (nonce, error))
    }

    /// Invalidate every send scoped to a channel being removed.
    ///
    /// Returns the invalidated nonces so late transport completions can be
    /// recognized and discarded.
    pub fn remove_channel(&mut self, key: &ChannelKey) -> Vec<SendNonce> {
        let removed: Vec<SendNonce> = self
            .in_flight
            .iter()
            .filter(|(_, send)| {
                send.server_id == key.server_id && send.channel_id == key.channel_id
            })
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &removed {
            self.in_flight.remove(nonce);
            self.failures.remove(nonce);
        }
        removed
    }
}
