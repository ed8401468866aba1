//! Chat request/response types
//!
//! Models the OpenAI-compatible Chat Completions streaming API: the request body
//! the client posts, and the frames it reads back.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GenerationConfig;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous run of text attributed to one role
///
/// Serializes as a `{role, content}` entry of the request's `messages` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBlock {
    pub role: Role,
    pub content: String,
}

impl MessageBlock {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user block
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant block
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// Body of a streaming chat completion request
///
/// Generation controls are pass-through configuration; the engine never
/// computes them.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<MessageBlock>,
    pub stream: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
}

impl ChatRequest {
    /// Build a streaming request for `messages`
    pub fn new(model: impl Into<String>, messages: Vec<MessageBlock>, generation: &GenerationConfig) -> Self {
        let model = model.into();
        debug!(%model, message_count = messages.len(), "ChatRequest::new: called");
        Self {
            model,
            messages,
            stream: true,
            temperature: generation.temperature,
            top_p: generation.top_p,
            max_tokens: generation.max_tokens,
            stop: generation.stop.clone(),
            presence_penalty: generation.presence_penalty,
            frequency_penalty: generation.frequency_penalty,
        }
    }
}

// Streaming frame types

/// One `data:` frame of the response stream
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamFrameBody {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamDelta {
    pub content: Option<String>,
}

impl StreamFrameBody {
    /// The frame's delta text, if non-empty
    pub fn into_delta(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|text| !text.is_empty())
    }
}

/// Structured error body returned with non-success statuses
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: Option<String>,
}
