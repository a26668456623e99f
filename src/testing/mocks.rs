//! Mock implementations for testing
//!
//! Provides a mock broker connector and a recording observer so the session
//! can be exercised without a running MQTT broker.

use crate::config::{BrokerConfig, Qos};
use crate::session::{ConsoleNotification, NotificationSink};
use crate::transport::{
    BrokerConnector, BrokerEvent, BrokerLink, LinkEvent, LinkEventSender, LinkId, RequestToken,
    TransportError,
};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A request submitted on a mock link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Publish {
        link: LinkId,
        topic: String,
        payload: String,
        qos: Qos,
        retain: bool,
        token: RequestToken,
    },
    Subscribe {
        link: LinkId,
        topic: String,
        qos: Qos,
        token: RequestToken,
    },
    Unsubscribe {
        link: LinkId,
        topic: String,
        token: RequestToken,
    },
}

impl BrokerCall {
    pub fn token(&self) -> RequestToken {
        match self {
            BrokerCall::Publish { token, .. }
            | BrokerCall::Subscribe { token, .. }
            | BrokerCall::Unsubscribe { token, .. } => *token,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            BrokerCall::Publish { topic, .. }
            | BrokerCall::Subscribe { topic, .. }
            | BrokerCall::Unsubscribe { topic, .. } => topic,
        }
    }
}

#[derive(Debug, Default)]
struct MockBrokerState {
    opened: Vec<(LinkId, String)>,
    ended: Vec<(LinkId, bool)>,
    calls: Vec<BrokerCall>,
    senders: HashMap<LinkId, LinkEventSender>,
    fail_open: bool,
    fail_submit: bool,
    refused_topics: HashSet<String>,
}

/// Mock broker connector
///
/// Clones share state, so a test can keep one clone for inspection after
/// handing another to the session.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockBrokerState>>,
    auto_connect: bool,
    auto_ack: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `open` fails
    pub fn with_failure() -> Self {
        let connector = Self::default();
        connector.state().fail_open = true;
        connector
    }

    /// Report `Connected` as soon as a link is opened
    pub fn auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    /// Acknowledge every request as soon as it is submitted
    pub fn auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockBrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make request submission fail from now on
    pub fn set_submit_failure(&self, fail: bool) {
        self.state().fail_submit = fail;
    }

    /// Auto-acknowledged requests on `topic` complete with an error
    pub fn refuse_topic(&self, topic: impl Into<String>) {
        self.state().refused_topics.insert(topic.into());
    }

    pub fn opened(&self) -> Vec<(LinkId, String)> {
        self.state().opened.clone()
    }

    pub fn ended(&self) -> Vec<(LinkId, bool)> {
        self.state().ended.clone()
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state().calls.clone()
    }

    pub fn clear_history(&self) {
        let mut state = self.state();
        state.calls.clear();
        state.ended.clear();
    }

    pub fn last_link(&self) -> Option<LinkId> {
        self.state().opened.last().map(|(link, _)| *link)
    }

    /// Inject an event as if `link` had reported it.
    /// Returns false when the link was never opened or its receiver is gone.
    pub fn emit(&self, link: LinkId, event: BrokerEvent) -> bool {
        match self.state().senders.get(&link) {
            Some(sender) => sender.send(LinkEvent { link, event }).is_ok(),
            None => false,
        }
    }

    /// Acknowledge the request carrying `token` on the latest link
    pub fn ack(&self, token: RequestToken, outcome: Result<(), String>) -> bool {
        match self.last_link() {
            Some(link) => self.emit(link, BrokerEvent::Acknowledged { token, outcome }),
            None => false,
        }
    }
}

impl BrokerConnector for MockConnector {
    fn open(
        &mut self,
        link: LinkId,
        url: &str,
        _broker: &BrokerConfig,
        events: LinkEventSender,
    ) -> Result<Box<dyn BrokerLink>, TransportError> {
        let mut state = self.state();
        if state.fail_open {
            return Err(TransportError::Closed);
        }
        if !url.starts_with("mqtt://") {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }

        state.opened.push((link, url.to_string()));
        state.senders.insert(link, events.clone());
        if self.auto_connect {
            let _ = events.send(LinkEvent {
                link,
                event: BrokerEvent::Connected,
            });
        }

        Ok(Box::new(MockLink {
            link,
            state: self.state.clone(),
            events,
            auto_ack: self.auto_ack,
        }))
    }
}

/// Link handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockLink {
    link: LinkId,
    state: Arc<Mutex<MockBrokerState>>,
    events: LinkEventSender,
    auto_ack: bool,
}

impl MockLink {
    fn record(&mut self, call: BrokerCall) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.fail_submit {
            return Err(TransportError::RequestQueue(
                "Mock request queue failure".to_string(),
            ));
        }

        let token = call.token();
        let refused = state.refused_topics.contains(call.topic());
        state.calls.push(call);
        drop(state);

        if self.auto_ack {
            let outcome = if refused {
                Err("Mock broker refused request".to_string())
            } else {
                Ok(())
            };
            let _ = self.events.send(LinkEvent {
                link: self.link,
                event: BrokerEvent::Acknowledged { token, outcome },
            });
        }
        Ok(())
    }
}

impl BrokerLink for MockLink {
    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
        token: RequestToken,
    ) -> Result<(), TransportError> {
        self.record(BrokerCall::Publish {
            link: self.link,
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(&payload).into_owned(),
            qos,
            retain,
            token,
        })
    }

    fn subscribe(&mut self, topic: &str, qos: Qos, token: RequestToken) -> Result<(), TransportError> {
        self.record(BrokerCall::Subscribe {
            link: self.link,
            topic: topic.to_string(),
            qos,
            token,
        })
    }

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError> {
        self.record(BrokerCall::Unsubscribe {
            link: self.link,
            topic: topic.to_string(),
            token,
        })
    }

    fn end(&mut self, force: bool) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.ended.push((self.link, force));
        state.senders.remove(&self.link);
    }
}

/// Observer that records every notification
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    notifications: Arc<Mutex<Vec<ConsoleNotification>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConsoleNotification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn notifications(&self) -> Vec<ConsoleNotification> {
        self.lock().clone()
    }

    /// Return and forget everything recorded so far
    pub fn take(&self) -> Vec<ConsoleNotification> {
        std::mem::take(&mut *self.lock())
    }

    pub fn count(&self, predicate: impl Fn(&ConsoleNotification) -> bool) -> usize {
        self.lock().iter().filter(|n| predicate(n)).count()
    }

    pub fn clear_history(&self) {
        self.lock().clear();
    }
}

impl NotificationSink for RecordingObserver {
    fn notify(&mut self, notification: ConsoleNotification) {
        self.lock().push(notification);
    }
}
