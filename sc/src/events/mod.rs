//! Event Bus for chat activity
//!
//! Every state transition of a chat turn is published on the bus. Clients emit
//! lifecycle events through an [`EventEmitter`] bound to their bot ID; front
//! ends and controllers subscribe, and may emit control signals back.
//!
//! # Architecture
//!
//! ```text
//!   StreamingClient ──emits──▶ chat-start / chat-add / chat-update / chat-done
//!                                   │
//!                              ┌────▼────┐
//!                              │EventBus │  sync handlers, registration order
//!                              └────┬────┘  + broadcast tap for async readers
//!                                   │
//!   REPL / renderer ◀───────────────┤
//!   ChatController  ◀── chat-request / chat-stop / chat-reset ── callers
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use streamchat::events::{ChatEvent, EventKind, create_event_bus};
//!
//! let bus = create_event_bus();
//! let id = bus.on(EventKind::Update, |event| println!("{:?}", event.content()));
//! bus.emitter_for("bot-007").chat_start();
//! bus.off(id);
//! ```

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, Handler, SubscriptionId, create_event_bus};
pub use types::{ChatEvent, EventKind};
