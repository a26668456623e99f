//! Presentation-facing callbacks
//!
//! The session never touches UI elements. It reports `(index, event)` pairs
//! and connection cues through [`ConsoleObserver`], and an adapter binds them
//! to whatever widgets it renders.

use crate::config::ConsoleConfig;
use crate::error::ActionError;
use tokio::sync::mpsc;

/// Callbacks invoked by the session. Every method defaults to a no-op.
pub trait ConsoleObserver: Send {
    fn on_connected(&mut self) {}
    fn on_disconnected(&mut self) {}
    fn on_reconnecting(&mut self) {}
    /// The link has not recovered yet, reset the "reconnecting" cue to neutral
    fn on_reconnect_idle(&mut self) {}
    fn on_error(&mut self, _detail: &str) {}

    fn on_item_message(&mut self, _index: usize, _payload: &str) {}
    fn on_item_message_cleared(&mut self, _index: usize) {}
    fn on_item_published(&mut self, _index: usize) {}
    fn on_item_flash_cleared(&mut self, _index: usize) {}
    /// A publisher finished its cooldown and can be triggered again
    fn on_item_ready(&mut self, _index: usize) {}
    fn on_item_subscribed(&mut self, _index: usize) {}
    fn on_item_unsubscribed(&mut self, _index: usize) {}
    fn on_item_failed(&mut self, _index: usize, _error: &ActionError) {}

    fn on_config_loaded(&mut self, _config: &ConsoleConfig) {}
    fn on_config_failed(&mut self, _reason: &str) {}
}

/// Owned form of every observer callback
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleNotification {
    Connected,
    Disconnected,
    Reconnecting,
    ReconnectIdle,
    Error(String),
    ItemMessage { index: usize, payload: String },
    ItemMessageCleared(usize),
    ItemPublished(usize),
    ItemFlashCleared(usize),
    ItemReady(usize),
    ItemSubscribed(usize),
    ItemUnsubscribed(usize),
    ItemFailed { index: usize, error: ActionError },
    /// Carries the broker summary of the new configuration
    ConfigLoaded { items: usize, broker: String },
    ConfigFailed(String),
}

/// Anything that can absorb notifications becomes an observer
pub trait NotificationSink: Send {
    fn notify(&mut self, notification: ConsoleNotification);
}

impl<T: NotificationSink> ConsoleObserver for T {
    fn on_connected(&mut self) {
        self.notify(ConsoleNotification::Connected);
    }

    fn on_disconnected(&mut self) {
        self.notify(ConsoleNotification::Disconnected);
    }

    fn on_reconnecting(&mut self) {
        self.notify(ConsoleNotification::Reconnecting);
    }

    fn on_reconnect_idle(&mut self) {
        self.notify(ConsoleNotification::ReconnectIdle);
    }

    fn on_error(&mut self, detail: &str) {
        self.notify(ConsoleNotification::Error(detail.to_string()));
    }

    fn on_item_message(&mut self, index: usize, payload: &str) {
        self.notify(ConsoleNotification::ItemMessage {
            index,
            payload: payload.to_string(),
        });
    }

    fn on_item_message_cleared(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemMessageCleared(index));
    }

    fn on_item_published(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemPublished(index));
    }

    fn on_item_flash_cleared(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemFlashCleared(index));
    }

    fn on_item_ready(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemReady(index));
    }

    fn on_item_subscribed(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemSubscribed(index));
    }

    fn on_item_unsubscribed(&mut self, index: usize) {
        self.notify(ConsoleNotification::ItemUnsubscribed(index));
    }

    fn on_item_failed(&mut self, index: usize, error: &ActionError) {
        self.notify(ConsoleNotification::ItemFailed {
            index,
            error: error.clone(),
        });
    }

    fn on_config_loaded(&mut self, config: &ConsoleConfig) {
        self.notify(ConsoleNotification::ConfigLoaded {
            items: config.items.len(),
            broker: config.broker.summary(),
        });
    }

    fn on_config_failed(&mut self, reason: &str) {
        self.notify(ConsoleNotification::ConfigFailed(reason.to_string()));
    }
}

impl NotificationSink for mpsc::UnboundedSender<ConsoleNotification> {
    fn notify(&mut self, notification: ConsoleNotification) {
        // The presentation side may have shut down first
        let _ = self.send(notification);
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ConsoleObserver for NullObserver {}
