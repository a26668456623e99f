//! Pure event routing and acknowledgment correlation for rumqttc events
//!
//! rumqttc reports request completion by packet id, while the session tracks
//! requests by [`RequestToken`]. Requests leave the client in submission order,
//! so each `Outgoing` notification pairs the oldest queued token of that kind
//! with its packet id, and the matching ack later completes it.

use crate::config::Qos;
use crate::transport::RequestToken;
use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Routing decisions for rumqttc events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent DISCONNECT
    Disconnected,
    PublishSent(u16),
    SubscribeSent(u16),
    UnsubscribeSent(u16),
    /// PubAck (QoS 1) or PubComp (QoS 2)
    PublishCompleted(u16),
    SubscribeCompleted { pkid: u16, refused: bool },
    UnsubscribeCompleted(u16),
    /// Infrastructure event (PingResp, PubRec, etc.)
    InfrastructureEvent(String),
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route rumqttc event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::PubAck(ack) => EventRoute::PublishCompleted(ack.pkid),
                Packet::PubComp(comp) => EventRoute::PublishCompleted(comp.pkid),
                Packet::SubAck(suback) => EventRoute::SubscribeCompleted {
                    pkid: suback.pkid,
                    refused: suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure)),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscribeCompleted(unsuback.pkid),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(pkid) => EventRoute::PublishSent(*pkid),
                Outgoing::Subscribe(pkid) => EventRoute::SubscribeSent(*pkid),
                Outgoing::Unsubscribe(pkid) => EventRoute::UnsubscribeSent(*pkid),
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
        }
    }
}

/// Kind of request awaiting correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Publish(Qos),
    Subscribe,
    Unsubscribe,
}

/// Completed request and its outcome
pub type Completion = (RequestToken, Result<(), String>);

/// Maps request tokens onto packet ids and packet acks back onto tokens
#[derive(Debug, Default)]
pub struct AckTracker {
    queued_publishes: VecDeque<(RequestToken, Qos)>,
    queued_subscribes: VecDeque<RequestToken>,
    queued_unsubscribes: VecDeque<RequestToken>,
    publishes: HashMap<u16, RequestToken>,
    subscribes: HashMap<u16, RequestToken>,
    unsubscribes: HashMap<u16, RequestToken>,
    /// QoS 1/2 publishes dropped on link failure that the client resends after reconnecting
    replayed_publishes: HashSet<u16>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request about to be handed to the client
    pub fn enqueue(&mut self, kind: RequestKind, token: RequestToken) {
        match kind {
            RequestKind::Publish(qos) => self.queued_publishes.push_back((token, qos)),
            RequestKind::Subscribe => self.queued_subscribes.push_back(token),
            RequestKind::Unsubscribe => self.queued_unsubscribes.push_back(token),
        }
    }

    /// Forget the most recent request of `kind` after its submission failed
    pub fn withdraw(&mut self, kind: RequestKind) {
        match kind {
            RequestKind::Publish(_) => {
                self.queued_publishes.pop_back();
            }
            RequestKind::Subscribe => {
                self.queued_subscribes.pop_back();
            }
            RequestKind::Unsubscribe => {
                self.queued_unsubscribes.pop_back();
            }
        }
    }

    /// Advance correlation with a routed event; returns a completion when one finishes
    pub fn on_route(&mut self, route: &EventRoute) -> Option<Completion> {
        match route {
            EventRoute::PublishSent(pkid) => {
                if self.replayed_publishes.remove(pkid) {
                    debug!("Publish {} resent after reconnect, no request waiting", pkid);
                    return None;
                }
                let (token, qos) = self.queued_publishes.pop_front()?;
                if qos == Qos::AtMostOnce {
                    return Some((token, Ok(())));
                }
                self.publishes.insert(*pkid, token);
                None
            }
            EventRoute::SubscribeSent(pkid) => {
                let token = self.queued_subscribes.pop_front()?;
                self.subscribes.insert(*pkid, token);
                None
            }
            EventRoute::UnsubscribeSent(pkid) => {
                let token = self.queued_unsubscribes.pop_front()?;
                self.unsubscribes.insert(*pkid, token);
                None
            }
            EventRoute::PublishCompleted(pkid) => {
                self.publishes.remove(pkid).map(|token| (token, Ok(())))
            }
            EventRoute::SubscribeCompleted { pkid, refused } => {
                self.subscribes.remove(pkid).map(|token| {
                    if *refused {
                        (token, Err("subscription refused by broker".to_string()))
                    } else {
                        (token, Ok(()))
                    }
                })
            }
            EventRoute::UnsubscribeCompleted(pkid) => {
                self.unsubscribes.remove(pkid).map(|token| (token, Ok(())))
            }
            _ => None,
        }
    }

    /// Drop every request already on the wire; called when the link fails.
    ///
    /// rumqttc keeps unacknowledged QoS 1/2 publishes and sends them again once
    /// reconnected, so their packet ids are remembered and the resend is not
    /// paired with a newer request.
    pub fn reset_in_flight(&mut self) {
        let dropped = self.publishes.len() + self.subscribes.len() + self.unsubscribes.len();
        if dropped > 0 {
            debug!("Dropping {} in-flight requests after link failure", dropped);
        }
        self.replayed_publishes
            .extend(self.publishes.drain().map(|(pkid, _)| pkid));
        self.subscribes.clear();
        self.unsubscribes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish, QoS, SubAck, UnsubAck};

    #[test]
    fn test_route_mqtt_event() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );

        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "room/temp",
            QoS::AtMostOnce,
            "22.5",
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "room/temp".to_string(),
                payload: Bytes::from("22.5"),
            }
        );

        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(4))),
            EventRoute::SubscribeSent(4)
        );
    }

    #[test]
    fn test_suback_failure_is_refused() {
        let suback = Event::Incoming(Packet::SubAck(SubAck::new(
            3,
            vec![SubscribeReasonCode::Failure],
        )));
        assert_eq!(
            MessageHandler::route_mqtt_event(&suback),
            EventRoute::SubscribeCompleted {
                pkid: 3,
                refused: true
            }
        );
    }

    #[test]
    fn test_qos0_publish_completes_when_sent() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(RequestKind::Publish(Qos::AtMostOnce), RequestToken(1));

        let completion = tracker.on_route(&EventRoute::PublishSent(0));
        assert_eq!(completion, Some((RequestToken(1), Ok(()))));
    }

    #[test]
    fn test_qos1_publish_completes_on_puback() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(RequestKind::Publish(Qos::AtLeastOnce), RequestToken(1));
        tracker.enqueue(RequestKind::Publish(Qos::AtLeastOnce), RequestToken(2));

        assert_eq!(tracker.on_route(&EventRoute::PublishSent(10)), None);
        assert_eq!(tracker.on_route(&EventRoute::PublishSent(11)), None);

        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::PubAck(
            PubAck::new(11),
        )));
        assert_eq!(tracker.on_route(&route), Some((RequestToken(2), Ok(()))));
        assert_eq!(
            tracker.on_route(&EventRoute::PublishCompleted(10)),
            Some((RequestToken(1), Ok(())))
        );
    }

    #[test]
    fn test_subscribe_and_unsubscribe_correlation() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(RequestKind::Subscribe, RequestToken(5));
        tracker.enqueue(RequestKind::Unsubscribe, RequestToken(6));

        tracker.on_route(&EventRoute::SubscribeSent(1));
        tracker.on_route(&EventRoute::UnsubscribeSent(2));

        assert_eq!(
            tracker.on_route(&EventRoute::SubscribeCompleted {
                pkid: 1,
                refused: true
            }),
            Some((
                RequestToken(5),
                Err("subscription refused by broker".to_string())
            ))
        );
        let route = MessageHandler::route_mqtt_event(&Event::Incoming(Packet::UnsubAck(
            UnsubAck::new(2),
        )));
        assert_eq!(tracker.on_route(&route), Some((RequestToken(6), Ok(()))));
    }

    #[test]
    fn test_withdraw_and_reset() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(RequestKind::Subscribe, RequestToken(1));
        tracker.withdraw(RequestKind::Subscribe);
        assert_eq!(tracker.on_route(&EventRoute::SubscribeSent(1)), None);

        tracker.enqueue(RequestKind::Subscribe, RequestToken(2));
        tracker.on_route(&EventRoute::SubscribeSent(2));
        tracker.reset_in_flight();
        assert_eq!(
            tracker.on_route(&EventRoute::SubscribeCompleted {
                pkid: 2,
                refused: false
            }),
            None
        );
    }

    #[test]
    fn test_resent_publish_does_not_take_newer_token() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(RequestKind::Publish(Qos::AtLeastOnce), RequestToken(1));
        assert_eq!(tracker.on_route(&EventRoute::PublishSent(1)), None);

        tracker.reset_in_flight();
        tracker.enqueue(RequestKind::Publish(Qos::AtLeastOnce), RequestToken(2));

        // rumqttc resends the unacknowledged packet first, then the new one
        assert_eq!(tracker.on_route(&EventRoute::PublishSent(1)), None);
        assert_eq!(tracker.on_route(&EventRoute::PublishSent(2)), None);

        assert_eq!(tracker.on_route(&EventRoute::PublishCompleted(1)), None);
        assert_eq!(
            tracker.on_route(&EventRoute::PublishCompleted(2)),
            Some((RequestToken(2), Ok(())))
        );
    }
}
