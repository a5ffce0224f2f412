//! Change notification for derived state.
//!
//! Replaces UI-framework reactivity with an explicit pub-sub seam: the
//! session emits [`StateChange`] values on a broadcast channel, consumers
//! subscribe and filter by scope. Emission is best-effort; lagged
//! subscribers are handled by `broadcast`, and unsubscribing is dropping
//! the receiver.

use tokio::sync::broadcast;

use crate::ids::{ChannelKey, ServerId};

/// What category of derived state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Timeline entries changed (insert, reconcile, failure state).
    Timeline,
    /// Unread/mention badges changed.
    Badges,
    /// Typing membership changed.
    Typing,
    /// A send's in-flight/failed state changed.
    SendState,
    /// A connection's lifecycle state changed.
    Connection,
    /// The scope itself was removed (channel left).
    Removed,
}

/// Scope a change applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeScope {
    Channel(ChannelKey),
    Server(ServerId),
}

/// One change notification fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub scope: ChangeScope,
    pub kind: ChangeKind,
}

impl StateChange {
    pub fn channel(key: ChannelKey, kind: ChangeKind) -> Self {
        Self {
            scope: ChangeScope::Channel(key),
            kind,
        }
    }

    pub fn server(server_id: ServerId, kind: ChangeKind) -> Self {
        Self {
            scope: ChangeScope::Server(server_id),
            kind,
        }
    }

    /// Receiver-side filter: whether this change concerns a channel scope
    /// (directly, or via its server).
    pub fn concerns(&self, key: &ChannelKey) -> bool {
        match &self.scope {
            ChangeScope::Channel(scope) => scope == key,
            ChangeScope::Server(server_id) => *server_id == key.server_id,
        }
    }
}

/// Stream of state changes for one subscriber.
pub type ChangeStream = broadcast::Receiver<StateChange>;

/// Broadcast fan-out for session state changes.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StateChange>,
}

impl ChangeNotifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// Subscribe to all subsequent state changes.
    pub fn subscribe(&self) -> ChangeStream {
        self.tx.subscribe()
    }

    /// Emit a change to all subscribers. Best-effort: a send with no
    /// subscribers is not an error.
    pub fn emit(&self, change: StateChange) {
        let _ = self.tx.send(change);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_changes_to_all_subscribers() {
        let notifier = ChangeNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        let change = StateChange::channel(ChannelKey::new("srv-a", "general"), ChangeKind::Timeline);
        notifier.emit(change.clone());

        assert_eq!(a.recv().await.expect("subscriber a should receive"), change);
        assert_eq!(b.recv().await.expect("subscriber b should receive"), change);
    }

    #[test]
    fn emit_without_subscribers_is_not_an_error() {
        let notifier = ChangeNotifier::new(8);
        notifier.emit(StateChange::server(
            ServerId::new("srv-a"),
            ChangeKind::Connection,
        ));
    }

    #[test]
    fn scope_filter_matches_channel_and_owning_server() {
        let key = ChannelKey::new("srv-a", "general");
        let direct = StateChange::channel(key.clone(), ChangeKind::Badges);
        let via_server = StateChange::server(ServerId::new("srv-a"), ChangeKind::Connection);
        let other = StateChange::channel(ChannelKey::new("srv-b", "general"), ChangeKind::Badges);

        assert!(direct.concerns(&key));
        assert!(via_server.concerns(&key));
        assert!(!other.concerns(&key));
    }
}
