//! Event Router: inbound messages to display slots, UI intents to operations

use super::connection::Context;
use super::timers::{DisplayClearPolicy, TimerKey};
use crate::config::TopicItem;
use bytes::Bytes;
use tracing::{debug, error};

/// A user action coming from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Click on the control bound to item `index`
    Trigger(usize),
    Connect,
    Disconnect,
    ToggleConnection,
}

pub struct EventRouter {
    /// Topic of each item, in index order
    topics: Vec<String>,
    /// Slot that armed the shared clear timer
    shared_slot: Option<usize>,
}

impl EventRouter {
    pub fn new(items: &[TopicItem]) -> Self {
        Self {
            topics: items.iter().map(|item| item.topic.clone()).collect(),
            shared_slot: None,
        }
    }

    /// First item whose topic equals `topic` exactly
    pub fn find_item(&self, topic: &str) -> Option<usize> {
        self.topics.iter().position(|candidate| candidate == topic)
    }

    /// Deliver an inbound message to its display slot. Returns the slot index.
    pub fn on_message(&mut self, topic: &str, payload: &Bytes, cx: &mut Context<'_>) -> Option<usize> {
        let Some(index) = self.find_item(topic) else {
            error!(
                "Received message for unconfigured topic '{}' ({} bytes), dropping",
                topic,
                payload.len()
            );
            return None;
        };

        let text = String::from_utf8_lossy(payload);
        debug!("Message on '{}' for item {}: {}", topic, index, text);
        cx.observer.on_item_message(index, &text);

        let at = cx.now + cx.timings.message_clear;
        match cx.timings.display_clear {
            DisplayClearPolicy::PerItem => cx.timers.schedule(TimerKey::MessageClear(index), at),
            DisplayClearPolicy::Global => {
                if cx.timers.schedule_if_idle(TimerKey::SharedMessageClear, at) {
                    self.shared_slot = Some(index);
                }
            }
        }
        Some(index)
    }

    /// A message clear timer fired
    pub fn on_timer(&mut self, key: TimerKey, cx: &mut Context<'_>) {
        let index = match key {
            TimerKey::MessageClear(index) => Some(index),
            TimerKey::SharedMessageClear => self.shared_slot.take(),
            _ => None,
        };
        if let Some(index) = index {
            cx.observer.on_item_message_cleared(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Binding, Qos};
    use crate::session::observer::{ConsoleNotification, NotificationSink};
    use crate::session::timers::{TimerQueue, Timings};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collected(Vec<ConsoleNotification>);

    impl NotificationSink for Collected {
        fn notify(&mut self, notification: ConsoleNotification) {
            self.0.push(notification);
        }
    }

    fn item(index: usize, topic: &str) -> TopicItem {
        TopicItem {
            index,
            name: format!("item{index}"),
            topic: topic.to_string(),
            qos: Qos::AtMostOnce,
            binding: Binding::Subscriber,
        }
    }

    #[test]
    fn test_find_item_first_match_wins() {
        let router = EventRouter::new(&[item(0, "a"), item(1, "b"), item(2, "b")]);
        assert_eq!(router.find_item("b"), Some(1));
        assert_eq!(router.find_item("a/#"), None);
    }

    #[test]
    fn test_unknown_topic_is_dropped() {
        let mut router = EventRouter::new(&[item(0, "room/temp")]);
        let mut observer = Collected::default();
        let mut timers = TimerQueue::new();
        let timings = Timings::default();
        let mut cx = Context {
            observer: &mut observer,
            timers: &mut timers,
            timings: &timings,
            now: Instant::now(),
        };

        assert_eq!(router.on_message("room/hum", &Bytes::from("40"), &mut cx), None);
        assert!(cx.timers.is_empty());
        assert!(observer.0.is_empty());
    }

    #[test]
    fn test_global_clear_only_clears_arming_slot() {
        let mut router = EventRouter::new(&[item(0, "a"), item(1, "b")]);
        let mut observer = Collected::default();
        let mut timers = TimerQueue::new();
        let timings = Timings {
            display_clear: DisplayClearPolicy::Global,
            ..Timings::default()
        };
        let start = Instant::now();
        let mut cx = Context {
            observer: &mut observer,
            timers: &mut timers,
            timings: &timings,
            now: start,
        };

        router.on_message("a", &Bytes::from("1"), &mut cx);
        cx.now = start + Duration::from_millis(400);
        router.on_message("b", &Bytes::from("2"), &mut cx);

        assert_eq!(cx.timers.len(), 1);
        assert_eq!(cx.timers.next_deadline(), Some(start + Duration::from_secs(1)));

        router.on_timer(TimerKey::SharedMessageClear, &mut cx);
        router.on_timer(TimerKey::SharedMessageClear, &mut cx);

        assert_eq!(
            observer.0.last(),
            Some(&ConsoleNotification::ItemMessageCleared(0))
        );
        assert_eq!(
            observer
                .0
                .iter()
                .filter(|n| matches!(n, ConsoleNotification::ItemMessageCleared(_)))
                .count(),
            1
        );
    }
}
