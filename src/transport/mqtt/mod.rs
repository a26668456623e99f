//! rumqttc-backed broker client
//!
//! # Architecture
//!
//! - [`connection`] - Pure option mapping from the broker configuration
//! - [`message_handler`] - Pure event routing and acknowledgment correlation
//! - [`client`] - Impure I/O: link handles and the event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_console::transport::mqtt::RumqttcConnector;
//! use mqtt_console::transport::BrokerConnector;
//! use mqtt_console::config::ConsoleConfig;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let config = ConsoleConfig::load_from_file("ui_setup.json".as_ref())?;
//! let (events_tx, mut events_rx) = mpsc::unbounded_channel();
//!
//! let mut connector = RumqttcConnector::new();
//! let _link = connector.open(1, &config.broker.url(), &config.broker, events_tx)?;
//! while let Some(event) = events_rx.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttcConnector, RumqttcLink};
pub use connection::configure_mqtt_options;
pub use message_handler::{AckTracker, EventRoute, MessageHandler};
