//! In-process publish/subscribe bus.
//!
//! Every subscription owns a bounded channel. Publishing never blocks: a
//! subscriber whose buffer is full, or whose token has been cancelled, is
//! dropped from the registry and its channel closes once drained.

use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of every subscription channel.
pub const EVENT_BUFFER_SIZE: usize = 16;

/// Kinds of events flowing through the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Fuel pressure is low again, the engine may resume.
    EngineShouldResume,
    /// Fuel pressure is high, the engine should pause.
    EngineShouldPause,
}

/// A published event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Kind of the event, used for routing.
    pub event_type: EventType,
    /// Human readable description.
    pub message: String,
    /// Optional structured data.
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Creates an event without payload.
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
            payload: None,
        }
    }

    /// Attaches a payload to the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

struct Slot {
    sender: mpsc::Sender<Event>,
    ctx: CancellationToken,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventType, HashMap<u64, Slot>>,
}

impl Registry {
    fn remove(&mut self, event_type: EventType, id: u64) {
        if let Some(slots) = self.subscribers.get_mut(&event_type) {
            slots.remove(&id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The event bus. Cloning is cheap and every clone shares the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `event_type`. The subscription is dropped
    /// from the bus once `ctx` is cancelled.
    pub fn subscribe(&self, ctx: &CancellationToken, event_type: EventType) -> Subscription {
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER_SIZE);

        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.entry(event_type).or_default().insert(
            id,
            Slot {
                sender,
                ctx: ctx.clone(),
            },
        );

        Subscription {
            id,
            event_type,
            ctx: ctx.clone(),
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every live subscriber of its type without blocking.
    pub fn publish_event(&self, event: Event) {
        let mut registry = lock(&self.registry);
        let Some(slots) = registry.subscribers.get_mut(&event.event_type) else {
            return;
        };

        slots.retain(|id, slot| {
            if slot.ctx.is_cancelled() {
                return false;
            }

            match slot.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "subscriber {id} of {:?} is not keeping up, unsubscribing it",
                        event.event_type
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Number of registered subscribers of `event_type`.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        lock(&self.registry)
            .subscribers
            .get(&event_type)
            .map_or(0, HashMap::len)
    }
}

/// Receiving side of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    event_type: EventType,
    ctx: CancellationToken,
    receiver: mpsc::Receiver<Event>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Type of the events delivered to this subscription.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Waits for the next event. Returns `None` once the subscription has
    /// been closed, dropped by the bus or cancelled.
    pub async fn recv(&mut self) -> Option<Event> {
        tokio::select! {
            biased;
            event = self.receiver.recv() => event,
            _ = self.ctx.cancelled() => {
                self.close();
                None
            }
        }
    }

    /// Removes the subscription from the bus. Calling it more than once is a
    /// no-op.
    pub fn close(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(self.event_type, self.id);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
