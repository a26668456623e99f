//! MQTT Console - topic-binding and connection-lifecycle core
//!
//! Binds a set of named controls, declared in a small JSON document, to MQTT
//! topics and drives publish/subscribe actions against a broker through a
//! single client connection.
//!
//! # Overview
//!
//! - [`config`]: document validation and loading from a file or URL
//! - [`session`]: the sans-IO core (connection state machine, per-item
//!   interaction state, message routing, timers)
//! - [`transport`]: the broker collaborator traits and the rumqttc adapter
//! - [`console`]: a tokio actor that drives a session
//! - [`observability`]: logging setup and span macros
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_console::config::ConfigSource;
//! use mqtt_console::console::Console;
//! use mqtt_console::session::{ConsoleNotification, Timings};
//! use mqtt_console::transport::mqtt::RumqttcConnector;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> mqtt_console::ConsoleResult<()> {
//! let (notifications, mut rx) = mpsc::unbounded_channel::<ConsoleNotification>();
//! let (console, _task) = Console::spawn(RumqttcConnector::new(), notifications, Timings::default());
//!
//! console.load(ConfigSource::parse("ui_setup.json")).await?;
//! while let Some(notification) = rx.recv().await {
//!     if let ConsoleNotification::ConfigLoaded { .. } = notification {
//!         console.connect().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigSource, ConsoleConfig, TopicItem};
pub use console::{Console, ConsoleHandle};
pub use error::{ActionError, ConnectionError, ConsoleError, ConsoleResult};
pub use session::{ConnectionState, ConsoleNotification, ConsoleObserver, Session};
