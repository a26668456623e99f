//! Deadline bookkeeping for the session
//!
//! The session never sleeps. Components record deadlines here and the driver
//! calls [`crate::session::Session::advance`] once [`TimerQueue::next_deadline`]
//! has passed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Every timer the session can arm. At most one of each key is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Reset the "reconnecting" cue if the link has not recovered
    ReconnectIdle,
    /// Burst guard for the connect/disconnect toggle
    ToggleGuard,
    /// End of the short "published" flash for an item
    PublishFlash(usize),
    /// End of the post-publish cooldown for an item
    PublishCooldown(usize),
    /// Clear an item's message display
    MessageClear(usize),
    /// Legacy shared message-display clear
    SharedMessageClear,
}

/// Fixed delays used by the session
#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    pub publish_flash: Duration,
    pub publish_cooldown: Duration,
    pub message_clear: Duration,
    pub reconnect_idle: Duration,
    pub toggle_guard: Duration,
    pub display_clear: DisplayClearPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            publish_flash: Duration::from_millis(100),
            publish_cooldown: Duration::from_millis(300),
            message_clear: Duration::from_millis(1000),
            // Shorter than the default 1000ms reconnect period
            reconnect_idle: Duration::from_millis(500),
            toggle_guard: Duration::from_millis(500),
            display_clear: DisplayClearPolicy::PerItem,
        }
    }
}

impl Timings {
    /// The idle cue only makes sense if it fires before the next retry
    pub fn validate_against(&self, reconnect_period: Duration) -> Result<(), String> {
        if !reconnect_period.is_zero() && self.reconnect_idle >= reconnect_period {
            return Err(format!(
                "reconnect idle timeout {:?} is not shorter than the reconnect period {:?}",
                self.reconnect_idle, reconnect_period
            ));
        }
        Ok(())
    }
}

/// How message displays are cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayClearPolicy {
    /// One timer per item, restarted on every message
    #[default]
    PerItem,
    /// One shared timer, never restarted while pending; clears only the slot that armed it
    Global,
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `key` to fire at `at`, replacing any pending deadline
    pub fn schedule(&mut self, key: TimerKey, at: Instant) {
        self.deadlines.insert(key, at);
    }

    /// Arm `key` unless it is already pending. Returns true if armed.
    pub fn schedule_if_idle(&mut self, key: TimerKey, at: Instant) -> bool {
        if self.deadlines.contains_key(&key) {
            return false;
        }
        self.deadlines.insert(key, at);
        true
    }

    pub fn cancel(&mut self, key: TimerKey) -> bool {
        self.deadlines.remove(&key).is_some()
    }

    pub fn is_pending(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return the earliest timer due at `now`
    ///
    /// Handlers may arm or cancel timers, so callers pop one key at a time.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        let (_, key) = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, *key))
            .min()?;
        self.deadlines.remove(&key);
        Some(key)
    }

    /// Cancel everything, used when a configuration is replaced
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
