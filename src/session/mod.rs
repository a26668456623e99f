//! Topic-binding session core
//!
//! A [`Session`] ties together the [`ConnectionManager`], the per-item
//! [`ItemController`] and the [`EventRouter`] for the currently loaded
//! configuration. It performs no I/O of its own and never sleeps: every
//! operation takes the current [`Instant`], and deadlines recorded in the
//! timer queue fire when the driver calls [`Session::advance`].
//!
//! ```
//! use mqtt_console::config::ConsoleConfig;
//! use mqtt_console::session::{ConnectionState, NullObserver, Session};
//! use mqtt_console::testing::MockConnector;
//! use std::time::Instant;
//! use tokio::sync::mpsc;
//!
//! let (link_tx, _link_rx) = mpsc::unbounded_channel();
//! let mut session = Session::new(MockConnector::new(), NullObserver, link_tx);
//!
//! let config = ConsoleConfig::from_json_str(
//!     r#"{"mqtt_broker": {"host": "localhost", "port": 1883, "options": {}},
//!         "items": [{"name": "Temp", "topic": "room/temp", "qos": 0}]}"#,
//! )
//! .unwrap();
//! session.load_config(config, Instant::now());
//! session.connect(Instant::now()).unwrap();
//! assert_eq!(session.connection_state(), ConnectionState::Connecting);
//! ```

pub mod connection;
pub mod items;
pub mod observer;
pub mod router;
pub mod timers;

pub use connection::{ConnectionManager, ConnectionState, Context, LinkTransition};
pub use items::{ItemController, ItemState, TriggerOutcome};
pub use observer::{ConsoleNotification, ConsoleObserver, NotificationSink, NullObserver};
pub use router::{EventRouter, Intent};
pub use timers::{DisplayClearPolicy, TimerKey, TimerQueue, Timings};

use crate::config::{ConsoleConfig, TopicItem};
use crate::error::{ActionError, ConnectionError, ConsoleResult};
use crate::transport::{BrokerConnector, BrokerEvent, LinkEvent, LinkEventSender, LinkId};
use std::time::Instant;
use tracing::{debug, info, warn};

/// State tied to one loaded configuration, discarded on replacement
struct LoadedConfig {
    config: ConsoleConfig,
    controller: ItemController,
    router: EventRouter,
}

/// Result of a connection toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Connecting(LinkId),
    Disconnected,
    /// Inside the burst guard window of a previous toggle
    Dropped,
}

/// Point-in-time view of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub index: usize,
    pub name: String,
    pub topic: String,
    pub publisher: bool,
    pub processing: bool,
    pub subscribed: bool,
}

/// Point-in-time view of the whole session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Broker summary of the loaded configuration
    pub broker: Option<String>,
    pub items: Vec<ItemSnapshot>,
}

pub struct Session {
    connector: Box<dyn BrokerConnector>,
    observer: Box<dyn ConsoleObserver>,
    link_events: LinkEventSender,
    timings: Timings,
    timers: TimerQueue,
    connection: ConnectionManager,
    loaded: Option<LoadedConfig>,
}

impl Session {
    /// Links opened by `connector` report their events on `link_events`.
    /// The driver feeds them back through [`Session::handle_link_event`].
    pub fn new(
        connector: impl BrokerConnector + 'static,
        observer: impl ConsoleObserver + 'static,
        link_events: LinkEventSender,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            observer: Box::new(observer),
            link_events,
            timings: Timings::default(),
            timers: TimerQueue::new(),
            connection: ConnectionManager::new(),
            loaded: None,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Install a validated configuration, replacing the previous one.
    ///
    /// Any live link is closed and every pending timer cancelled before the
    /// new per-item state is created.
    pub fn load_config(&mut self, config: ConsoleConfig, now: Instant) {
        let Self {
            observer,
            timings,
            timers,
            connection,
            loaded,
            ..
        } = self;
        let mut cx = Context {
            observer: observer.as_mut(),
            timers,
            timings,
            now,
        };

        if connection.has_link() {
            info!("Closing current broker link before loading new configuration");
            connection.disconnect(&mut cx);
        }
        cx.timers.clear();

        if let Err(reason) = cx.timings.validate_against(config.broker.options.reconnect_period()) {
            warn!("{}", reason);
        }

        info!(
            "Loaded configuration with {} items for {}",
            config.items.len(),
            config.broker.url()
        );
        let controller = ItemController::new(config.items.clone());
        let router = EventRouter::new(&config.items);
        cx.observer.on_config_loaded(&config);
        *loaded = Some(LoadedConfig {
            config,
            controller,
            router,
        });
    }

    /// A configuration load failed; the current configuration stays in place
    pub fn config_failed(&mut self, reason: &str) {
        warn!("Configuration load failed: {}", reason);
        self.observer.on_config_failed(reason);
    }

    pub fn config(&self) -> Option<&ConsoleConfig> {
        self.loaded.as_ref().map(|loaded| &loaded.config)
    }

    pub fn connect(&mut self, now: Instant) -> Result<LinkId, ConnectionError> {
        let Self {
            connector,
            observer,
            link_events,
            timings,
            timers,
            connection,
            loaded,
        } = self;
        let Some(loaded) = loaded.as_ref() else {
            warn!("Connect requested before any configuration was loaded");
            return Err(ConnectionError::NoConfiguration);
        };
        let mut cx = Context {
            observer: observer.as_mut(),
            timers,
            timings,
            now,
        };

        connection.connect(&loaded.config.broker, connector.as_mut(), link_events, &mut cx)
    }

    /// Close the link. Returns false when no link existed.
    pub fn disconnect(&mut self, now: Instant) -> bool {
        let Self {
            observer,
            timings,
            timers,
            connection,
            loaded,
            ..
        } = self;
        let mut cx = Context {
            observer: observer.as_mut(),
            timers,
            timings,
            now,
        };

        if !connection.disconnect(&mut cx) {
            return false;
        }
        if let Some(loaded) = loaded.as_mut() {
            loaded.controller.abort_in_flight(&mut cx);
            loaded.controller.reset_subscriptions(&mut cx);
        }
        true
    }

    /// Connect when no link exists, disconnect otherwise
    pub fn toggle_connection(&mut self, now: Instant) -> Result<ToggleOutcome, ConnectionError> {
        if self.timers.is_pending(TimerKey::ToggleGuard) {
            debug!("Connection toggle ignored inside guard window");
            return Ok(ToggleOutcome::Dropped);
        }

        if self.connection.has_link() {
            self.disconnect(now);
            self.arm_toggle_guard(now);
            Ok(ToggleOutcome::Disconnected)
        } else {
            let link = self.connect(now)?;
            self.arm_toggle_guard(now);
            Ok(ToggleOutcome::Connecting(link))
        }
    }

    fn arm_toggle_guard(&mut self, now: Instant) {
        self.timers
            .schedule(TimerKey::ToggleGuard, now + self.timings.toggle_guard);
    }

    /// One user action on item `index`
    pub fn trigger(&mut self, index: usize, now: Instant) -> Result<TriggerOutcome, ActionError> {
        let Self {
            observer,
            timings,
            timers,
            connection,
            loaded,
            ..
        } = self;
        let Some(loaded) = loaded.as_mut() else {
            return Err(ActionError::NoConfiguration);
        };
        let _span = crate::item_span!(index).entered();
        let mut cx = Context {
            observer: observer.as_mut(),
            timers,
            timings,
            now,
        };

        loaded.controller.trigger(index, connection, &mut cx)
    }

    /// Apply a presentation intent
    pub fn dispatch(&mut self, intent: Intent, now: Instant) -> ConsoleResult<()> {
        match intent {
            Intent::Trigger(index) => {
                self.trigger(index, now)?;
            }
            Intent::Connect => {
                self.connect(now)?;
            }
            Intent::Disconnect => {
                self.disconnect(now);
            }
            Intent::ToggleConnection => {
                self.toggle_connection(now)?;
            }
        }
        Ok(())
    }

    /// Feed one event reported by a broker link
    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        let Self {
            observer,
            timings,
            timers,
            connection,
            loaded,
            ..
        } = self;

        if !connection.accepts(event.link) {
            debug!("Ignoring event from stale link {}: {:?}", event.link, event.event);
            return;
        }
        let mut cx = Context {
            observer: observer.as_mut(),
            timers,
            timings,
            now,
        };

        match &event.event {
            BrokerEvent::Message { topic, payload } => match loaded.as_mut() {
                Some(loaded) => {
                    loaded.router.on_message(topic, payload, &mut cx);
                }
                None => warn!("Message on '{}' without a loaded configuration", topic),
            },
            BrokerEvent::Acknowledged { token, outcome } => {
                if let Some(loaded) = loaded.as_mut() {
                    loaded.controller.on_ack(*token, outcome.clone(), &mut cx);
                }
            }
            connection_event => match connection.apply_event(connection_event, &mut cx) {
                LinkTransition::Established { resubscribe: true } => {
                    if let Some(loaded) = loaded.as_mut() {
                        loaded.controller.resubscribe(connection, &mut cx);
                    }
                }
                LinkTransition::Lost => {
                    if let Some(loaded) = loaded.as_mut() {
                        loaded.controller.abort_in_flight(&mut cx);
                    }
                }
                LinkTransition::Established { resubscribe: false } | LinkTransition::Unchanged => {}
            },
        }
    }

    /// Fire every timer due at `now`, earliest first
    pub fn advance(&mut self, now: Instant) {
        let Self {
            observer,
            timings,
            timers,
            connection,
            loaded,
            ..
        } = self;

        while let Some(key) = timers.pop_due(now) {
            let mut cx = Context {
                observer: observer.as_mut(),
                timers: &mut *timers,
                timings: &*timings,
                now,
            };

            match key {
                TimerKey::ReconnectIdle => connection.on_reconnect_idle(&mut cx),
                TimerKey::ToggleGuard => debug!("Connection toggle guard released"),
                TimerKey::PublishFlash(_) | TimerKey::PublishCooldown(_) => {
                    if let Some(loaded) = loaded.as_mut() {
                        loaded.controller.on_timer(key, &mut cx);
                    }
                }
                TimerKey::MessageClear(_) | TimerKey::SharedMessageClear => {
                    if let Some(loaded) = loaded.as_mut() {
                        loaded.router.on_timer(key, &mut cx);
                    }
                }
            }
        }
    }

    /// When [`Session::advance`] next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn item_state(&self, index: usize) -> Option<ItemState> {
        self.loaded
            .as_ref()
            .and_then(|loaded| loaded.controller.state(index))
    }

    pub fn items(&self) -> &[TopicItem] {
        match &self.loaded {
            Some(loaded) => loaded.controller.items(),
            None => &[],
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let items = self
            .items()
            .iter()
            .map(|item| {
                let state = self.item_state(item.index).unwrap_or_default();
                ItemSnapshot {
                    index: item.index,
                    name: item.name.clone(),
                    topic: item.topic.clone(),
                    publisher: item.is_publisher(),
                    processing: state.processing,
                    subscribed: state.subscribed,
                }
            })
            .collect();

        SessionSnapshot {
            state: self.connection.state(),
            broker: self.config().map(|config| config.broker.summary()),
            items,
        }
    }
}
