//! Connection Manager: the single broker link and its state machine

use super::observer::ConsoleObserver;
use super::timers::{TimerKey, TimerQueue, Timings};
use crate::config::{BrokerConfig, TopicItem};
use crate::error::{ActionError, ActionKind, ConnectionError};
use crate::transport::{
    BrokerConnector, BrokerEvent, BrokerLink, LinkEventSender, LinkId, RequestToken,
    TransportError,
};
use bytes::Bytes;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Connection state, owned by the [`ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing opened yet
    #[default]
    Idle,
    /// Link opened, waiting for the broker's acknowledgment
    Connecting,
    /// Ready for publish/subscribe
    Connected,
    /// Link lost, the client is retrying
    Reconnecting,
    /// Closed explicitly or by the broker
    Disconnected,
    /// Broker reported an error; the client may still recover
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Errored => "errored",
        };
        write!(f, "{name}")
    }
}

/// Shared per-call context: where notifications and deadlines go
pub struct Context<'a> {
    pub observer: &'a mut dyn ConsoleObserver,
    pub timers: &'a mut TimerQueue,
    pub timings: &'a Timings,
    pub now: Instant,
}

/// What the rest of the session must do after a link event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// Link (re)established; `resubscribe` is set when it had been up before
    Established { resubscribe: bool },
    /// Link went down; requests awaiting acknowledgment will never complete
    Lost,
    /// Nothing beyond the state change
    Unchanged,
}

struct ActiveLink {
    id: LinkId,
    handle: Box<dyn BrokerLink>,
    ever_connected: bool,
}

/// Owns the only broker link
pub struct ConnectionManager {
    state: ConnectionState,
    link: Option<ActiveLink>,
    next_link_id: LinkId,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            link: None,
            next_link_id: 1,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn link_id(&self) -> Option<LinkId> {
        self.link.as_ref().map(|link| link.id)
    }

    /// Events are only accepted from the link currently held
    pub fn accepts(&self, link: LinkId) -> bool {
        self.link_id() == Some(link)
    }

    /// Open the broker link. Rejected if one already exists.
    pub fn connect(
        &mut self,
        broker: &BrokerConfig,
        connector: &mut dyn BrokerConnector,
        events: &LinkEventSender,
        cx: &mut Context<'_>,
    ) -> Result<LinkId, ConnectionError> {
        if let Some(link) = &self.link {
            warn!(
                "Connect requested while link {} exists (state: {})",
                link.id, self.state
            );
            return Err(ConnectionError::AlreadyConnected);
        }

        let url = broker.url();
        let id = self.next_link_id;
        self.next_link_id += 1;

        match connector.open(id, &url, broker, events.clone()) {
            Ok(handle) => {
                info!("Connecting to broker {} (link {})", url, id);
                self.link = Some(ActiveLink {
                    id,
                    handle,
                    ever_connected: false,
                });
                self.transition(ConnectionState::Connecting);
                Ok(id)
            }
            Err(e) => {
                error!("Failed to open broker link to {}: {}", url, e);
                self.transition(ConnectionState::Errored);
                cx.observer.on_error(&e.to_string());
                Err(match e {
                    TransportError::InvalidUrl(url) => ConnectionError::InvalidBrokerUrl(url),
                    TransportError::RequestQueue(reason) => ConnectionError::Transport(reason),
                    TransportError::Closed => ConnectionError::OpenFailed("link closed".to_string()),
                })
            }
        }
    }

    /// Force the link closed without waiting for in-flight acknowledgments.
    /// Returns false when there was nothing to close.
    pub fn disconnect(&mut self, cx: &mut Context<'_>) -> bool {
        let Some(mut link) = self.link.take() else {
            debug!("Explicit disconnect requested without a broker link");
            return false;
        };

        info!("Explicitly disconnecting link {} from broker", link.id);
        link.handle.end(true);
        cx.timers.cancel(TimerKey::ReconnectIdle);
        self.transition(ConnectionState::Disconnected);
        cx.observer.on_disconnected();
        true
    }

    /// Apply a connection-level event from the current link
    pub fn apply_event(&mut self, event: &BrokerEvent, cx: &mut Context<'_>) -> LinkTransition {
        let Some(link) = self.link.as_mut() else {
            return LinkTransition::Unchanged;
        };
        let previous = self.state;
        let next = Self::next_state(previous, event);

        let outcome = match event {
            BrokerEvent::Connected => {
                let resubscribe = link.ever_connected;
                link.ever_connected = true;
                cx.timers.cancel(TimerKey::ReconnectIdle);
                LinkTransition::Established { resubscribe }
            }
            BrokerEvent::Reconnecting => {
                if cx
                    .timers
                    .schedule_if_idle(TimerKey::ReconnectIdle, cx.now + cx.timings.reconnect_idle)
                {
                    debug!("Armed reconnect idle timeout");
                }
                LinkTransition::Lost
            }
            BrokerEvent::Disconnected => LinkTransition::Lost,
            _ => LinkTransition::Unchanged,
        };

        self.transition(next);

        match event {
            BrokerEvent::Connected => cx.observer.on_connected(),
            BrokerEvent::Reconnecting => cx.observer.on_reconnecting(),
            BrokerEvent::Disconnected => cx.observer.on_disconnected(),
            BrokerEvent::Error(detail) => cx.observer.on_error(detail),
            _ => {}
        }

        outcome
    }

    /// The reconnect idle timeout fired
    pub fn on_reconnect_idle(&mut self, cx: &mut Context<'_>) {
        if self.state != ConnectionState::Connected && self.link.is_some() {
            debug!("Link still down after idle timeout (state: {})", self.state);
            cx.observer.on_reconnect_idle();
        }
    }

    pub fn publish(&mut self, item: &TopicItem, token: RequestToken) -> Result<(), ActionError> {
        let message = item.message().ok_or_else(|| {
            ActionError::rejected(ActionKind::Publish, &item.topic, "not a publisher binding")
        })?;
        let link = self.ready_link()?;
        link.publish(
            &item.topic,
            Bytes::from(message.to_string()),
            item.qos,
            false,
            token,
        )
        .map_err(|e| ActionError::rejected(ActionKind::Publish, &item.topic, e.to_string()))
    }

    pub fn subscribe(&mut self, item: &TopicItem, token: RequestToken) -> Result<(), ActionError> {
        let link = self.ready_link()?;
        link.subscribe(&item.topic, item.qos, token)
            .map_err(|e| ActionError::rejected(ActionKind::Subscribe, &item.topic, e.to_string()))
    }

    pub fn unsubscribe(
        &mut self,
        item: &TopicItem,
        token: RequestToken,
    ) -> Result<(), ActionError> {
        let link = self.ready_link()?;
        link.unsubscribe(&item.topic, token).map_err(|e| {
            ActionError::rejected(ActionKind::Unsubscribe, &item.topic, e.to_string())
        })
    }

    fn ready_link(&mut self) -> Result<&mut (dyn BrokerLink + 'static), ActionError> {
        let state = self.state;
        match self.link.as_mut() {
            Some(link) if state == ConnectionState::Connected => Ok(link.handle.as_mut()),
            _ => Err(ActionError::NotConnected { state }),
        }
    }

    /// Determine next state after a link event (pure function)
    pub fn next_state(current: ConnectionState, event: &BrokerEvent) -> ConnectionState {
        match event {
            BrokerEvent::Connected => ConnectionState::Connected,
            BrokerEvent::Reconnecting => ConnectionState::Reconnecting,
            BrokerEvent::Disconnected => ConnectionState::Disconnected,
            BrokerEvent::Error(_) => ConnectionState::Errored,
            BrokerEvent::Message { .. } | BrokerEvent::Acknowledged { .. } => current,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state;
        self.state = next;
        Self::log_state_transition(previous, next);
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established successfully");
            }
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                info!("Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting) => {
                warn!("MQTT connection lost, reconnecting");
            }
            (_, ConnectionState::Errored) => {
                warn!("MQTT connection error (was {})", from);
            }
            (a, b) if a == b => {
                debug!("MQTT connection state unchanged: {}", a);
            }
            _ => {
                info!("MQTT connection state: {} -> {}", from, to);
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
