//! streamchat - streaming chat client with incremental tag extraction
//!
//! streamchat consumes an OpenAI-compatible streaming chat response whose
//! frame boundaries do not line up with network reads, reassembles it into
//! role-scoped message blocks, and publishes every block transition on an
//! event bus. A separate tokenizer splits assistant text into literal text and
//! whitelisted control tags that may straddle chunk boundaries.
//!
//! # Core Concepts
//!
//! - **Snapshots on the bus**: every add/update event carries the whole block
//! - **One writer**: the client is the only place conversation state changes
//! - **Cooperative cancellation**: stopping a turn still finalizes it
//! - **No lost bytes**: decoding and tokenizing never drop input
//!
//! # Modules
//!
//! - [`events`] - Publish/subscribe bus and chat event types
//! - [`llm`] - Streaming client, transport seam and body decoder
//! - [`tags`] - Incremental control-tag tokenizer
//! - [`controller`] - Routes bus signals into a client
//! - [`repl`] - Terminal front end
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod controller;
pub mod events;
pub mod llm;
pub mod repl;
pub mod tags;

// Re-export commonly used types
pub use config::{ChatConfig, Config, GenerationConfig, LlmConfig};
pub use controller::{ChatController, ControlCommand};
pub use events::{ChatEvent, EventBus, EventEmitter, EventKind, SubscriptionId, create_event_bus};
pub use llm::{
    ChatTransport, HttpTransport, LlmError, MessageBlock, Role, StopHandle, StreamingClient, create_client,
};
pub use tags::{DEFAULT_ALLOWED_TAGS, TagMachine, Token};
