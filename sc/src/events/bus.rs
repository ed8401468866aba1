//! Event Bus - central pub/sub system for chat events
//!
//! Handlers registered with [`EventBus::on`] are invoked synchronously, in
//! registration order, from inside [`EventBus::emit`]. Async consumers can also
//! take a tokio broadcast receiver with [`EventBus::subscribe`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, error};

use super::types::{ChatEvent, EventKind};
use crate::llm::{MessageBlock, Role};

/// Default broadcast channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Synchronous event handler
pub type Handler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Central event bus for chat activity
///
/// Shared between one or more clients (each stamping its own bot ID) and the
/// consumers that render or react to their events.
pub struct EventBus {
    registry: Mutex<Registry>,
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    /// Create a new event bus with the given broadcast capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self {
            registry: Mutex::new(Registry::default()),
            tx,
        }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Handlers never run under the lock, so poisoning carries no torn state
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler for one event kind
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.subscriptions.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        debug!(?id, %kind, "EventBus::on: handler registered");
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|s| s.id != id);
        let removed = registry.subscriptions.len() != before;
        debug!(?id, removed, "EventBus::off: called");
        removed
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.registry().subscriptions.iter().any(|s| s.id == id)
    }

    /// Emit an event to every handler registered for its kind, then to broadcast receivers
    ///
    /// Dispatch walks a snapshot of the registry, so handlers may emit, subscribe
    /// or unsubscribe re-entrantly. A handler removed before its turn is skipped.
    /// A panicking handler is logged and does not stop the remaining handlers.
    pub fn emit(&self, event: ChatEvent) {
        let kind = event.kind();
        let snapshot: Vec<(SubscriptionId, Handler)> = self
            .registry()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();
        debug!(event_type = kind.as_str(), handlers = snapshot.len(), "EventBus::emit");

        for (id, handler) in snapshot {
            if !self.is_registered(id) {
                debug!(?id, "EventBus::emit: handler removed during dispatch, skipping");
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (*handler)(&event))).is_err() {
                error!(?id, event_type = kind.as_str(), "EventBus::emit: handler panicked");
            }
        }

        // Ignore send errors (no receivers is OK)
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive every event asynchronously
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        debug!("EventBus::subscribe: new receiver");
        self.tx.subscribe()
    }

    /// Number of registered handlers plus broadcast receivers
    pub fn subscriber_count(&self) -> usize {
        self.registry().subscriptions.len() + self.tx.receiver_count()
    }

    /// Create an emitter that stamps every event with `bot_id`
    pub fn emitter_for(self: &Arc<Self>, bot_id: impl Into<String>) -> EventEmitter {
        let bot_id = bot_id.into();
        debug!(%bot_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            bus: Arc::clone(self),
            bot_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for a client to emit events without owning the bus
///
/// Cheap to clone; every event carries the bot ID it was created with.
#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<EventBus>,
    bot_id: String,
}

impl EventEmitter {
    /// Get the bot ID this emitter is bound to
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Get the underlying bus
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Emit a raw event
    pub fn emit(&self, event: ChatEvent) {
        self.bus.emit(event);
    }

    // === Convenience methods ===

    /// Emit a chat-start event
    pub fn chat_start(&self) {
        self.emit(ChatEvent::Start {
            bot_id: self.bot_id.clone(),
        });
    }

    /// Emit a chat-add event with a snapshot of the new block
    pub fn chat_add(&self, block: &MessageBlock) {
        self.emit(ChatEvent::Add {
            role: block.role,
            content: block.content.clone(),
            bot_id: self.bot_id.clone(),
        });
    }

    /// Emit a chat-update event with a snapshot of the current block
    pub fn chat_update(&self, block: &MessageBlock) {
        self.emit(ChatEvent::Update {
            role: block.role,
            content: block.content.clone(),
            bot_id: self.bot_id.clone(),
        });
    }

    /// Emit a chat-done event
    pub fn chat_done(&self, role: Role, content: &str) {
        self.emit(ChatEvent::Done {
            role,
            content: content.to_string(),
            bot_id: self.bot_id.clone(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
