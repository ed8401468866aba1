//! Streaming chat client module
//!
//! Provides the conversation-owning [`StreamingClient`], the transport seam it
//! talks through, and the incremental body decoder.

use std::sync::Arc;

use tracing::debug;

pub mod client;
pub mod decode;
mod error;
pub mod transport;
mod types;

pub use client::{ERROR_PREFIX, StopHandle, StreamingClient};
pub use decode::{FrameDecoder, LineBuffer, StreamFrame, Utf8Decoder};
pub use error::LlmError;
pub use transport::{ByteStream, ChatTransport, HttpTransport};
pub use types::{ChatRequest, MessageBlock, Role};

use crate::config::Config;
use crate::events::EventBus;

/// Create a streaming client over HTTP from configuration
///
/// The client publishes on `bus` under the configured bot ID.
pub fn create_client(config: &Config, bus: &Arc<EventBus>) -> Result<StreamingClient, LlmError> {
    debug!(endpoint = %config.llm.endpoint, model = %config.llm.model, "create_client: called");
    let transport = HttpTransport::from_config(&config.llm)?;
    Ok(StreamingClient::new(
        Arc::new(transport),
        bus.emitter_for(config.chat.bot_id.clone()),
        config.llm.model.clone(),
        config.llm.generation.clone(),
    ))
}
