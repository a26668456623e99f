//! Broker client seam
//!
//! The session never talks to a network library directly. It opens links
//! through a [`BrokerConnector`] and submits requests on the returned
//! [`BrokerLink`]. Submission never blocks; everything the broker says back,
//! including request acknowledgments, arrives later as a [`LinkEvent`] on the
//! channel handed to the connector.

use crate::config::{BrokerConfig, Qos};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Identifies one opened connection. Events from a closed link are stale.
pub type LinkId = u64;

/// Correlates a submitted request with its acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

/// Everything a link reports back to the session
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Broker acknowledged the connection
    Connected,
    /// Message received on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// Broker closed the connection
    Disconnected,
    /// Transport or protocol error, the link may still recover
    Error(String),
    /// Link lost, the client is retrying
    Reconnecting,
    /// A submitted request completed
    Acknowledged {
        token: RequestToken,
        outcome: Result<(), String>,
    },
}

/// A broker event tagged with the link that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: BrokerEvent,
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Request submission failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),
    #[error("Request queue unavailable: {0}")]
    RequestQueue(String),
    #[error("Link closed")]
    Closed,
}

/// Opens broker connections
pub trait BrokerConnector: Send {
    /// Open a link to `url`. Events for it must be sent on `events` tagged with `link`.
    fn open(
        &mut self,
        link: LinkId,
        url: &str,
        broker: &BrokerConfig,
        events: LinkEventSender,
    ) -> Result<Box<dyn BrokerLink>, TransportError>;
}

/// One open broker connection
pub trait BrokerLink: Send {
    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
        token: RequestToken,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str, qos: Qos, token: RequestToken)
        -> Result<(), TransportError>;

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError>;

    /// Close the link. `force` drops in-flight requests without waiting.
    fn end(&mut self, force: bool);
}
