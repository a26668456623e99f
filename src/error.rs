//! Error taxonomy for the console core
//!
//! Configuration problems are reported by [`crate::config::ConfigError`] and
//! reach the presentation layer as a reason string through
//! `on_config_failed`, never through [`ConsoleError`]. Broker
//! transport problems become [`ConnectionError`], and failed or refused item
//! actions become [`ActionError`]. Neither of the latter ever escapes the
//! session as a fault: they are turned into state transitions and observer
//! notifications, and returned to the caller that raised the intent.

use crate::session::ConnectionState;
use std::fmt;
use thiserror::Error;

/// Broker action performed on behalf of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Publish => write!(f, "publish"),
            ActionKind::Subscribe => write!(f, "subscribe"),
            ActionKind::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// Connection lifecycle errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    #[error("A broker connection already exists")]
    AlreadyConnected,
    #[error("No configuration loaded")]
    NoConfiguration,
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Failed to open broker connection: {0}")]
    OpenFailed(String),
    #[error("Broker transport error: {0}")]
    Transport(String),
}

/// Item action errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("No configuration loaded")]
    NoConfiguration,
    #[error("Unknown item index {0}")]
    UnknownItem(usize),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Broker rejected {action} on '{topic}': {reason}")]
    Rejected {
        action: ActionKind,
        topic: String,
        reason: String,
    },
    #[error("{action} on '{topic}' aborted: connection lost")]
    Aborted { action: ActionKind, topic: String },
}

impl ActionError {
    pub fn rejected<S: Into<String>>(action: ActionKind, topic: &str, reason: S) -> Self {
        Self::Rejected {
            action,
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }

    pub fn aborted(action: ActionKind, topic: &str) -> Self {
        Self::Aborted {
            action,
            topic: topic.to_string(),
        }
    }
}

/// Top-level error for console operations
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Console is no longer running")]
    ConsoleClosed,
}

/// Result type for console operations
pub type ConsoleResult<T> = Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_mentions_state() {
        let error = ActionError::NotConnected {
            state: ConnectionState::Reconnecting,
        };
        assert_eq!(error.to_string(), "Not connected - current state: reconnecting");
    }

    #[test]
    fn test_action_error_constructors() {
        let rejected = ActionError::rejected(ActionKind::Subscribe, "room/temp", "refused");
        assert_eq!(
            rejected.to_string(),
            "Broker rejected subscribe on 'room/temp': refused"
        );

        let aborted = ActionError::aborted(ActionKind::Publish, "room/ac");
        assert_eq!(aborted.to_string(), "publish on 'room/ac' aborted: connection lost");
    }

    #[test]
    fn test_console_error_from_conversions() {
        let error: ConsoleError = ConnectionError::AlreadyConnected.into();
        assert!(matches!(error, ConsoleError::Connection(_)));

        let error: ConsoleError = ActionError::UnknownItem(7).into();
        assert_eq!(error.to_string(), "Action error: Unknown item index 7");
    }
}
