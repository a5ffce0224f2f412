//! Inbound realtime event classification and connection lifecycle.
//!
//! One router per server connection. Events are dispatched only while the
//! connection is `Live` and resynced; anything arriving across a gap is
//! buffered and replayed after the resync so nothing is dropped silently.
//! A bounded recently-seen set per channel shortcuts duplicate delivery
//! before it reaches the timeline store's idempotency check; it is not a
//! substitute for that check.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::error::{CoreError, ErrorCategory};
use crate::events::RealtimeEvent;
use crate::ids::{ChannelId, ServerId};

/// Lifecycle of one server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
}

/// What the router decided to do with one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Trusted incremental event; apply it now.
    Dispatch(RealtimeEvent),
    /// Held until the post-gap resync completes.
    Buffered,
    /// Recently-seen event id; dropped before reaching the store.
    DuplicateDropped,
    /// The client is not subscribed to this channel (left/removed).
    UnsubscribedDropped,
    /// Event for a different server, or delivered outside a connected
    /// state; dropped and logged.
    Unroutable,
}

/// Bounded event-id memory for one channel.
#[derive(Debug, Default)]
struct RecentEvents {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentEvents {
    fn remember(&mut self, event_id: &str, cap: usize) -> bool {
        if self.seen.contains(event_id) {
            return false;
        }
        self.order.push_back(event_id.to_owned());
        self.seen.insert(event_id.to_owned());
        while self.order.len() > cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Routes one server's realtime stream into the reconciliation core.
#[derive(Debug)]
pub struct EventRouter {
    server_id: ServerId,
    state: ConnectionState,
    subscribed: HashSet<ChannelId>,
    recent: HashMap<ChannelId, RecentEvents>,
    replay_buffer: VecDeque<RealtimeEvent>,
    /// Set on every entry into `Live`; incremental events are buffered
    /// until the owner completes a resync and calls
    /// [`take_resynced`](Self::take_resynced).
    needs_resync: bool,
    recent_cap: usize,
    replay_cap: usize,
}

impl EventRouter {
    pub fn new(server_id: ServerId, recent_cap: usize, replay_cap: usize) -> Self {
        Self {
            server_id,
            state: ConnectionState::Disconnected,
            subscribed: HashSet::new(),
            recent: HashMap::new(),
            replay_buffer: VecDeque::new(),
            needs_resync: false,
            recent_cap: recent_cap.max(1),
            replay_cap: replay_cap.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Whether a resync must complete before incremental events are
    /// trusted again.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn subscribe(&mut self, channel_id: ChannelId) {
        self.subscribed.insert(channel_id);
    }

    pub fn is_subscribed(&self, channel_id: &ChannelId) -> bool {
        self.subscribed.contains(channel_id)
    }

    /// Drop the subscription and every buffered/remembered event for the
    /// channel.
    pub fn unsubscribe(&mut self, channel_id: &ChannelId) {
        self.subscribed.remove(channel_id);
        self.recent.remove(channel_id);
        self.replay_buffer
            .retain(|event| event.scope().1 != channel_id);
    }

    pub fn connect(&mut self) -> Result<(), CoreError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connecting, "connect")
    }

    pub fn established(&mut self) -> Result<(), CoreError> {
        self.transition(ConnectionState::Connecting, ConnectionState::Live, "established")?;
        self.needs_resync = true;
        Ok(())
    }

    pub fn connection_lost(&mut self) -> Result<(), CoreError> {
        self.transition(ConnectionState::Live, ConnectionState::Reconnecting, "connection_lost")
    }

    pub fn reestablished(&mut self) -> Result<(), CoreError> {
        self.transition(ConnectionState::Reconnecting, ConnectionState::Live, "reestablished")?;
        self.needs_resync = true;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.replay_buffer.clear();
        self.needs_resync = false;
    }

    /// Classify one inbound event.
    pub fn route(&mut self, event: RealtimeEvent) -> RouteOutcome {
        let (server_id, channel_id) = event.scope();
        if *server_id != self.server_id {
            warn!(
                event_server = %server_id,
                router_server = %self.server_id,
                "event for foreign server dropped"
            );
            return RouteOutcome::Unroutable;
        }

        if !self.subscribed.contains(channel_id) {
            debug!(channel = %channel_id, event_id = event.event_id(), "event for unsubscribed channel dropped");
            return RouteOutcome::UnsubscribedDropped;
        }

        match self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                warn!(
                    state = ?self.state,
                    event_id = event.event_id(),
                    "event delivered outside a connected state dropped"
                );
                return RouteOutcome::Unroutable;
            }
            ConnectionState::Live | ConnectionState::Reconnecting => {}
        }

        let channel_id = channel_id.clone();
        let fresh = self
            .recent
            .entry(channel_id)
            .or_default()
            .remember(event.event_id(), self.recent_cap);
        if !fresh {
            debug!(event_id = event.event_id(), "recently-seen event shortcut");
            return RouteOutcome::DuplicateDropped;
        }

        if self.state == ConnectionState::Reconnecting || self.needs_resync {
            self.buffer_for_replay(event);
            return RouteOutcome::Buffered;
        }

        RouteOutcome::Dispatch(event)
    }

    /// Complete the post-gap resync and drain buffered events, in delivery
    /// order, for replay through the normal apply path.
    pub fn take_resynced(&mut self) -> Vec<RealtimeEvent> {
        self.needs_resync = false;
        self.replay_buffer.drain(..).collect()
    }

    fn buffer_for_replay(&mut self, event: RealtimeEvent) {
        if self.replay_buffer.len() >= self.replay_cap {
            // The gap outgrew the buffer; the resync snapshot covers what
            // is evicted here.
            if let Some(evicted) = self.replay_buffer.pop_front() {
                warn!(event_id = evicted.event_id(), "replay buffer full, oldest event evicted");
            }
        }
        self.replay_buffer.push_back(event);
    }

    fn transition(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        action: &str,
    ) -> Result<(), CoreError> {
        if self.state != expected {
            return Err(CoreError::new(
                ErrorCategory::Consistency,
                "invalid_connection_transition",
                format!("cannot run '{action}' while connection is {:?}", self.state),
            ));
        }
        self.state = next;
        Ok(())
    }
}
