//! Transport seam between the reconciliation core and the network layer.
//!
//! The core consumes exactly two request/response endpoints, message
//! create and read-ack, plus the realtime stream it is fed directly.
//! [`Transport`] abstracts the two endpoints; [`InMemoryTransport`] is the
//! deterministic double used by tests and the smoke runner, with
//! scriptable failure injection.

use std::sync::Mutex;

use harbor_core::{
    AckReceipt, ChannelId, CoreError, ErrorCategory, MessageId, SendDraft, SendNonce, SendReceipt,
    ServerId, SyncState, classify_http_status,
};
use thiserror::Error;

/// Failures produced at the transport edge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response arrived inside the request deadline.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-success status.
    #[error("server returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    /// The transport itself is unusable (connection refused, poisoned
    /// internal state).
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Map the transport failure into the core error taxonomy.
    pub fn into_core_error(self) -> CoreError {
        match self {
            Self::Timeout => CoreError::timeout(),
            Self::Status { status, detail } => {
                let category = classify_http_status(status);
                let code = match category {
                    ErrorCategory::Permission => "write_denied",
                    ErrorCategory::Validation => "rejected_by_server",
                    ErrorCategory::TransientNetwork => "server_unavailable",
                    ErrorCategory::Consistency => "unexpected_status",
                };
                CoreError::new(category, code, detail)
            }
            Self::Unavailable(detail) => CoreError::new(
                ErrorCategory::TransientNetwork,
                "transport_unavailable",
                detail,
            ),
        }
    }
}

/// The two request/response endpoints the core consumes.
pub trait Transport: Send + Sync {
    /// `POST /channels/{id}/messages`.
    fn send_message(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        nonce: &SendNonce,
        draft: &SendDraft,
    ) -> Result<SendReceipt, TransportError>;

    /// `PUT` read-ack endpoint.
    fn put_read_ack(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
        last_read_message_id: &MessageId,
        acked_at_ms: u64,
    ) -> Result<AckReceipt, TransportError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_message_seq: u64,
    clock_ms: u64,
    fail_next: Option<TransportError>,
}

/// Deterministic in-memory transport: sequential message ids, a manually
/// advanced clock, and one-shot failure injection.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    state: Mutex<InMemoryState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next request fail with `error`, then recover.
    pub fn fail_next(&self, error: TransportError) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = Some(error);
        }
    }

    /// Advance the server-side clock.
    pub fn advance_clock(&self, delta_ms: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.clock_ms += delta_ms;
        }
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("poisoned transport state".to_owned()))
    }
}

impl Transport for InMemoryTransport {
    fn send_message(
        &self,
        _server_id: &ServerId,
        channel_id: &ChannelId,
        _nonce: &SendNonce,
        _draft: &SendDraft,
    ) -> Result<SendReceipt, TransportError> {
        let mut state = self.locked()?;
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.next_message_seq += 1;
        state.clock_ms += 1;
        Ok(SendReceipt {
            message_id: MessageId::new(format!("m-{}", state.next_message_seq)),
            channel_id: channel_id.clone(),
            created_at_ms: state.clock_ms,
            sync_state: SyncState::Confirmed,
        })
    }

    fn put_read_ack(
        &self,
        _server_id: &ServerId,
        _channel_id: &ChannelId,
        last_read_message_id: &MessageId,
        acked_at_ms: u64,
    ) -> Result<AckReceipt, TransportError> {
        let mut state = self.locked()?;
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.clock_ms = state.clock_ms.max(acked_at_ms);
        Ok(AckReceipt {
            last_read_message_id: last_read_message_id.clone(),
            acked_at_ms: state.clock_ms,
            applied: Some(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> (ServerId, ChannelId, SendNonce) {
        (
            ServerId::new("srv-a"),
            ChannelId::new("general"),
            SendNonce::new("send-1"),
        )
    }

    #[test]
    fn assigns_sequential_ids_and_monotonic_timestamps() {
        let transport = InMemoryTransport::new();
        let (server, channel, nonce) = scope();
        let draft = SendDraft::text("hello");

        let first = transport
            .send_message(&server, &channel, &nonce, &draft)
            .expect("send should work");
        let second = transport
            .send_message(&server, &channel, &nonce, &draft)
            .expect("send should work");

        assert_eq!(first.message_id.as_str(), "m-1");
        assert_eq!(second.message_id.as_str(), "m-2");
        assert!(second.created_at_ms > first.created_at_ms);
        assert_eq!(first.sync_state, SyncState::Confirmed);
    }

    #[test]
    fn injected_failure_hits_exactly_one_request() {
        let transport = InMemoryTransport::new();
        let (server, channel, nonce) = scope();
        let draft = SendDraft::text("hello");
        transport.fail_next(TransportError::Timeout);

        let err = transport
            .send_message(&server, &channel, &nonce, &draft)
            .expect_err("injected failure should surface");
        assert_eq!(err, TransportError::Timeout);

        transport
            .send_message(&server, &channel, &nonce, &draft)
            .expect("transport should recover after the injected failure");
    }

    #[test]
    fn read_ack_echoes_cursor_with_server_time() {
        let transport = InMemoryTransport::new();
        let (server, channel, _) = scope();
        transport.advance_clock(500);

        let receipt = transport
            .put_read_ack(&server, &channel, &MessageId::new("m-1"), 200)
            .expect("ack should work");
        assert_eq!(receipt.last_read_message_id.as_str(), "m-1");
        assert_eq!(receipt.acked_at_ms, 500);
        assert_eq!(receipt.applied, Some(true));
    }

    #[test]
    fn status_errors_classify_into_core_taxonomy() {
        let denied = TransportError::Status {
            status: 403,
            detail: "muted".to_owned(),
        }
        .into_core_error();
        assert_eq!(denied.category, ErrorCategory::Permission);
        assert_eq!(denied.code, "write_denied");
        assert!(!denied.is_retryable());

        let flaky = TransportError::Status {
            status: 503,
            detail: "overloaded".to_owned(),
        }
        .into_core_error();
        assert!(flaky.is_retryable());

        let rejected = TransportError::Status {
            status: 422,
            detail: "mention malformed".to_owned(),
        }
        .into_core_error();
        assert_eq!(rejected.code, "rejected_by_server");
        assert_eq!(TransportError::Timeout.into_core_error().code, "timeout");
    }
}
