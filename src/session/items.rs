//! Item Interaction Controller
//!
//! Each item carries two flags. `processing` serializes user triggers: while an
//! action is in flight further triggers for that item are dropped, never queued.
//! `subscribed` selects between subscribe and unsubscribe for subscriber
//! bindings. Every path that sets `processing` has a matching path that clears
//! it, including broker failures and link loss.

use super::connection::{ConnectionManager, Context};
use super::timers::TimerKey;
use crate::config::{Binding, TopicItem};
use crate::error::{ActionError, ActionKind};
use crate::transport::RequestToken;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Runtime flags for one item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemState {
    pub processing: bool,
    pub subscribed: bool,
}

/// Result of a trigger that passed the connection check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The broker request was submitted
    Dispatched(ActionKind),
    /// An action was already in flight for this item
    Dropped,
}

#[derive(Debug, Clone, Copy)]
struct PendingAction {
    index: usize,
    action: ActionKind,
    /// Issued by the session after a reconnect, not by a trigger
    resubscribe: bool,
}

/// Per-item state machine, rebuilt on every configuration load
pub struct ItemController {
    items: Vec<TopicItem>,
    states: Vec<ItemState>,
    pending: HashMap<RequestToken, PendingAction>,
    next_token: u64,
}

impl ItemController {
    pub fn new(items: Vec<TopicItem>) -> Self {
        let states = vec![ItemState::default(); items.len()];
        Self {
            items,
            states,
            pending: HashMap::new(),
            next_token: 1,
        }
    }

    pub fn items(&self) -> &[TopicItem] {
        &self.items
    }

    pub fn state(&self, index: usize) -> Option<ItemState> {
        self.states.get(index).copied()
    }

    /// Requests still waiting for a broker acknowledgment
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Handle one user trigger for `index`
    pub fn trigger(
        &mut self,
        index: usize,
        connection: &mut ConnectionManager,
        cx: &mut Context<'_>,
    ) -> Result<TriggerOutcome, ActionError> {
        let Self {
            items,
            states,
            pending,
            next_token,
        } = self;

        let item = items.get(index).ok_or(ActionError::UnknownItem(index))?;
        let state = &mut states[index];

        if !connection.is_connected() {
            warn!("Not connected to broker, ignoring trigger for item {}", index);
            return Err(ActionError::NotConnected {
                state: connection.state(),
            });
        }

        if state.processing {
            debug!("Item {} busy, trigger dropped", index);
            return Ok(TriggerOutcome::Dropped);
        }

        let action = match (&item.binding, state.subscribed) {
            (Binding::Publisher { .. }, _) => ActionKind::Publish,
            (Binding::Subscriber, false) => ActionKind::Subscribe,
            (Binding::Subscriber, true) => ActionKind::Unsubscribe,
        };

        let token = RequestToken(*next_token);
        *next_token += 1;
        state.processing = true;

        let submitted = match action {
            ActionKind::Publish => connection.publish(item, token),
            ActionKind::Subscribe => connection.subscribe(item, token),
            ActionKind::Unsubscribe => connection.unsubscribe(item, token),
        };

        match submitted {
            Ok(()) => {
                debug!("Item {} {} '{}' submitted", index, action, item.topic);
                pending.insert(
                    token,
                    PendingAction {
                        index,
                        action,
                        resubscribe: false,
                    },
                );
                Ok(TriggerOutcome::Dispatched(action))
            }
            Err(e) => {
                warn!("Item {} {} failed to submit: {}", index, action, e);
                state.processing = false;
                cx.observer.on_item_failed(index, &e);
                Err(e)
            }
        }
    }

    /// A broker acknowledgment arrived for `token`
    pub fn on_ack(&mut self, token: RequestToken, outcome: Result<(), String>, cx: &mut Context<'_>) {
        let Some(pending) = self.pending.remove(&token) else {
            debug!("Ignoring acknowledgment for unknown request {:?}", token);
            return;
        };
        let index = pending.index;
        let topic = self.items[index].topic.clone();
        let state = &mut self.states[index];

        if pending.resubscribe {
            match outcome {
                Ok(()) => debug!("Re-subscribed item {} to '{}'", index, topic),
                Err(reason) => {
                    warn!("Re-subscription of '{}' refused: {}", topic, reason);
                    if state.subscribed && !state.processing {
                        state.subscribed = false;
                        let error = ActionError::rejected(ActionKind::Subscribe, &topic, reason);
                        cx.observer.on_item_failed(index, &error);
                        cx.observer.on_item_unsubscribed(index);
                    }
                }
            }
            return;
        }

        match (pending.action, outcome) {
            (ActionKind::Publish, Ok(())) => {
                debug!("mqtt.client.published: {}", topic);
                cx.observer.on_item_published(index);
                cx.timers.schedule(
                    TimerKey::PublishFlash(index),
                    cx.now + cx.timings.publish_flash,
                );
                cx.timers.schedule(
                    TimerKey::PublishCooldown(index),
                    cx.now + cx.timings.publish_cooldown,
                );
            }
            (ActionKind::Subscribe, Ok(())) => {
                info!("Subscribed item {} to '{}'", index, topic);
                state.subscribed = true;
                state.processing = false;
                cx.observer.on_item_subscribed(index);
            }
            (ActionKind::Unsubscribe, Ok(())) => {
                info!("Unsubscribed item {} from '{}'", index, topic);
                state.subscribed = false;
                state.processing = false;
                cx.observer.on_item_unsubscribed(index);
            }
            (action, Err(reason)) => {
                warn!("Broker rejected {} on '{}': {}", action, topic, reason);
                state.processing = false;
                let error = ActionError::rejected(action, &topic, reason);
                cx.observer.on_item_failed(index, &error);
            }
        }
    }

    /// A publish flash or cooldown timer fired
    pub fn on_timer(&mut self, key: TimerKey, cx: &mut Context<'_>) {
        let index = match key {
            TimerKey::PublishFlash(index) => {
                cx.observer.on_item_flash_cleared(index);
                index
            }
            TimerKey::PublishCooldown(index) => index,
            _ => return,
        };

        let settled = !cx.timers.is_pending(TimerKey::PublishFlash(index))
            && !cx.timers.is_pending(TimerKey::PublishCooldown(index));
        if let Some(state) = self.states.get_mut(index) {
            if settled && state.processing {
                state.processing = false;
                cx.observer.on_item_ready(index);
            }
        }
    }

    /// Fail every request still waiting for an acknowledgment
    pub fn abort_in_flight(&mut self, cx: &mut Context<'_>) {
        let mut aborted: Vec<(RequestToken, PendingAction)> = self.pending.drain().collect();
        aborted.sort_by_key(|(token, _)| *token);

        for (_, pending) in aborted {
            if pending.resubscribe {
                continue;
            }
            let index = pending.index;
            self.states[index].processing = false;
            let error = ActionError::aborted(pending.action, &self.items[index].topic);
            warn!("Item {}: {}", index, error);
            cx.observer.on_item_failed(index, &error);
        }
    }

    /// Restore subscriptions after the link came back
    pub fn resubscribe(&mut self, connection: &mut ConnectionManager, cx: &mut Context<'_>) {
        for index in 0..self.items.len() {
            let state = self.states[index];
            if !state.subscribed || state.processing {
                continue;
            }

            let token = RequestToken(self.next_token);
            self.next_token += 1;
            match connection.subscribe(&self.items[index], token) {
                Ok(()) => {
                    self.pending.insert(
                        token,
                        PendingAction {
                            index,
                            action: ActionKind::Subscribe,
                            resubscribe: true,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to re-subscribe item {}: {}", index, e);
                    self.states[index].subscribed = false;
                    cx.observer.on_item_failed(index, &e);
                    cx.observer.on_item_unsubscribed(index);
                }
            }
        }
    }

    /// Forget all subscriptions; a fresh link starts without any
    pub fn reset_subscriptions(&mut self, cx: &mut Context<'_>) {
        for (index, state) in self.states.iter_mut().enumerate() {
            if state.subscribed {
                state.subscribed = false;
                cx.observer.on_item_unsubscribed(index);
            }
        }
    }
}
