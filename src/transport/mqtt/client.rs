//! Impure I/O for the rumqttc adapter
//!
//! Each opened link owns a rumqttc `AsyncClient` for request submission and a
//! background task that polls the `EventLoop`, forwarding connection events
//! and acknowledgments to the session's link event channel.

use super::connection::{configure_mqtt_options, connection_timeout_secs, to_rumqttc_qos};
use super::message_handler::{AckTracker, EventRoute, MessageHandler, RequestKind};
use crate::config::{BrokerConfig, Qos};
use crate::transport::{
    BrokerConnector, BrokerEvent, BrokerLink, LinkEvent, LinkEventSender, LinkId, RequestToken,
    TransportError,
};
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Request channel capacity for each rumqttc client
const REQUEST_CAPACITY: usize = 32;

/// Opens rumqttc-backed links. Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct RumqttcConnector {
    capacity: usize,
}

impl RumqttcConnector {
    pub fn new() -> Self {
        Self {
            capacity: REQUEST_CAPACITY,
        }
    }
}

impl Default for RumqttcConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConnector for RumqttcConnector {
    fn open(
        &mut self,
        link: LinkId,
        url: &str,
        broker: &BrokerConfig,
        events: LinkEventSender,
    ) -> Result<Box<dyn BrokerLink>, TransportError> {
        let mqtt_options = configure_mqtt_options(url, broker)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, self.capacity);
        event_loop
            .network_options
            .set_connection_timeout(connection_timeout_secs(broker.options.connect_timeout()));

        let tracker = Arc::new(Mutex::new(AckTracker::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!("Opening broker link {} to {}", link, url);
        let task = tokio::spawn(
            pump_events(
                link,
                event_loop,
                events,
                tracker.clone(),
                broker.options.reconnect_period(),
                shutdown_rx,
            )
            .instrument(crate::mqtt_span!(link, client_id = %broker.options.client_id)),
        );

        Ok(Box::new(RumqttcLink {
            link,
            client,
            tracker,
            shutdown_tx,
            task,
        }))
    }
}

/// One rumqttc connection
pub struct RumqttcLink {
    link: LinkId,
    client: AsyncClient,
    tracker: Arc<Mutex<AckTracker>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RumqttcLink {
    fn tracker(&self) -> MutexGuard<'_, AckTracker> {
        lock_tracker(&self.tracker)
    }

    /// Register the token first so the event task can never observe the
    /// outgoing packet before the token is queued
    fn submit(
        &mut self,
        kind: RequestKind,
        token: RequestToken,
        request: impl FnOnce(&AsyncClient) -> Result<(), rumqttc::ClientError>,
    ) -> Result<(), TransportError> {
        self.tracker().enqueue(kind, token);
        request(&self.client).map_err(|e| {
            self.tracker().withdraw(kind);
            TransportError::RequestQueue(e.to_string())
        })
    }
}

impl BrokerLink for RumqttcLink {
    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: Qos,
        retain: bool,
        token: RequestToken,
    ) -> Result<(), TransportError> {
        self.submit(RequestKind::Publish(qos), token, |client| {
            client.try_publish(topic, to_rumqttc_qos(qos), retain, payload.to_vec())
        })
    }

    fn subscribe(
        &mut self,
        topic: &str,
        qos: Qos,
        token: RequestToken,
    ) -> Result<(), TransportError> {
        self.submit(RequestKind::Subscribe, token, |client| {
            client.try_subscribe(topic, to_rumqttc_qos(qos))
        })
    }

    fn unsubscribe(&mut self, topic: &str, token: RequestToken) -> Result<(), TransportError> {
        self.submit(RequestKind::Unsubscribe, token, |client| {
            client.try_unsubscribe(topic)
        })
    }

    fn end(&mut self, force: bool) {
        debug!("Ending broker link {} (force: {})", self.link, force);
        if !force {
            if let Err(e) = self.client.try_disconnect() {
                warn!("Failed to queue DISCONNECT on link {}: {}", self.link, e);
            }
        }
        let _ = self.shutdown_tx.send(true);
        if force {
            self.task.abort();
        }
    }
}

impl Drop for RumqttcLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock_tracker(tracker: &Mutex<AckTracker>) -> MutexGuard<'_, AckTracker> {
    tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Send an event to the session; false once the session has gone away
fn emit(events: &LinkEventSender, link: LinkId, event: BrokerEvent) -> bool {
    events.send(LinkEvent { link, event }).is_ok()
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Poll the event loop until shutdown, reconnecting after `reconnect_period`
/// whenever the link fails. A zero period disables reconnection.
async fn pump_events(
    link: LinkId,
    mut event_loop: EventLoop,
    events: LinkEventSender,
    tracker: Arc<Mutex<AckTracker>>,
    reconnect_period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("Shutdown signal received for link {}", link);
                    break;
                }
            }
            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if !forward_route(link, route, &events, &tracker) {
                        break;
                    }
                }
                Err(e) => {
                    lock_tracker(&tracker).reset_in_flight();
                    error!("MQTT event loop error on link {}: {}", link, e);
                    if !emit(&events, link, BrokerEvent::Error(e.to_string())) {
                        break;
                    }

                    if reconnect_period.is_zero() {
                        let _ = emit(&events, link, BrokerEvent::Disconnected);
                        break;
                    }
                    if !emit(&events, link, BrokerEvent::Reconnecting) {
                        break;
                    }
                    if !interruptible_sleep(shutdown_rx.clone(), reconnect_period).await {
                        break;
                    }
                }
            }
        }
    }
    debug!("Event loop stopped for link {}", link);
}

/// Returns false when the session stopped listening
fn forward_route(
    link: LinkId,
    route: EventRoute,
    events: &LinkEventSender,
    tracker: &Mutex<AckTracker>,
) -> bool {
    if let Some((token, outcome)) = lock_tracker(tracker).on_route(&route) {
        if !emit(events, link, BrokerEvent::Acknowledged { token, outcome }) {
            return false;
        }
    }

    match route {
        EventRoute::ConnectionAcknowledged => emit(events, link, BrokerEvent::Connected),
        EventRoute::MessageReceived { topic, payload } => {
            emit(events, link, BrokerEvent::Message { topic, payload })
        }
        EventRoute::Disconnected => emit(events, link, BrokerEvent::Disconnected),
        EventRoute::InfrastructureEvent(event) => {
            tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
            true
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerOptions;
    use tokio::sync::mpsc;

    fn test_broker(reconnect_period_ms: u64) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port, nothing listens there
            port: 1,
            options: BrokerOptions {
                client_id: "link-test".to_string(),
                clean: true,
                keep_alive_secs: 60,
                connect_timeout_ms: 1000,
                reconnect_period_ms,
                credentials: None,
            },
        }
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connector = RumqttcConnector::new();
        let result = connector.open(1, "not a url", &test_broker(1000), tx);
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_error_then_reconnecting() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = test_broker(1000);
        let mut connector = RumqttcConnector::new();
        let mut link = connector.open(7, &broker.url(), &broker, tx).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("error event")
            .unwrap();
        assert_eq!(first.link, 7);
        assert!(matches!(first.event, BrokerEvent::Error(_)));

        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reconnecting event")
            .unwrap();
        assert_eq!(second.event, BrokerEvent::Reconnecting);

        link.end(true);
    }

    #[tokio::test]
    async fn test_zero_reconnect_period_stops_after_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = test_broker(0);
        let mut connector = RumqttcConnector::new();
        let _link = connector.open(3, &broker.url(), &broker, tx).unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            seen.push(event.event);
        }

        assert!(matches!(seen.first(), Some(BrokerEvent::Error(_))));
        assert_eq!(seen.last(), Some(&BrokerEvent::Disconnected));
    }
}
