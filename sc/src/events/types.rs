//! Event types for chat activity
//!
//! Every observable step of a chat turn is one `ChatEvent` variant:
//! - Client lifecycle (start, block added, block updated, done)
//! - External control signals (reset, request, stop)

use serde::{Deserialize, Serialize};

use crate::llm::Role;

/// Core event enum - the vocabulary of chat activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    // === Client Lifecycle ===
    /// Generation has begun
    #[serde(rename = "chat-start", rename_all = "camelCase")]
    Start { bot_id: String },

    /// A new message block was opened
    #[serde(rename = "chat-add", rename_all = "camelCase")]
    Add { role: Role, content: String, bot_id: String },

    /// The current message block was appended to
    #[serde(rename = "chat-update", rename_all = "camelCase")]
    Update { role: Role, content: String, bot_id: String },

    /// The turn finished (success, error, or cancellation)
    #[serde(rename = "chat-done", rename_all = "camelCase")]
    Done { role: Role, content: String, bot_id: String },

    // === External Signals ===
    /// Request a conversation reset
    #[serde(rename = "chat-reset")]
    Reset,

    /// Inject text and send it immediately
    #[serde(rename = "chat-request")]
    Request { text: String },

    /// Request cancellation of the in-flight turn
    #[serde(rename = "chat-stop")]
    Stop,
}

/// Payload-free discriminant of [`ChatEvent`], used to key subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Add,
    Update,
    Done,
    Reset,
    Request,
    Stop,
}

impl EventKind {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "chat-start",
            EventKind::Add => "chat-add",
            EventKind::Update => "chat-update",
            EventKind::Done => "chat-done",
            EventKind::Reset => "chat-reset",
            EventKind::Request => "chat-request",
            EventKind::Stop => "chat-stop",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChatEvent {
    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ChatEvent::Start { .. } => EventKind::Start,
            ChatEvent::Add { .. } => EventKind::Add,
            ChatEvent::Update { .. } => EventKind::Update,
            ChatEvent::Done { .. } => EventKind::Done,
            ChatEvent::Reset => EventKind::Reset,
            ChatEvent::Request { .. } => EventKind::Request,
            ChatEvent::Stop => EventKind::Stop,
        }
    }

    /// Get the event type name as a string
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Get the bot ID, for events emitted by a client
    pub fn bot_id(&self) -> Option<&str> {
        match self {
            ChatEvent::Start { bot_id }
            | ChatEvent::Add { bot_id, .. }
            | ChatEvent::Update { bot_id, .. }
            | ChatEvent::Done { bot_id, .. } => Some(bot_id),
            ChatEvent::Reset | ChatEvent::Request { .. } | ChatEvent::Stop => None,
        }
    }

    /// Get the block content carried by add/update/done events
    pub fn content(&self) -> Option<&str> {
        match self {
            ChatEvent::Add { content, .. } | ChatEvent::Update { content, .. } | ChatEvent::Done { content, .. } => {
                Some(content)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let event = ChatEvent::Start {
            bot_id: "bot-1".to_string(),
        };
        assert_eq!(event.event_type(), "chat-start");
        assert_eq!(event.kind(), EventKind::Start);
        assert_eq!(ChatEvent::Stop.event_type(), "chat-stop");
    }

    #[test]
    fn test_bot_id_only_on_client_events() {
        let event = ChatEvent::Update {
            role: Role::Assistant,
            content: "hi".to_string(),
            bot_id: "bot-7".to_string(),
        };
        assert_eq!(event.bot_id(), Some("bot-7"));
        assert_eq!(event.content(), Some("hi"));
        assert_eq!(ChatEvent::Reset.bot_id(), None);
        assert_eq!(ChatEvent::Request { text: "x".into() }.content(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = ChatEvent::Add {
            role: Role::User,
            content: "hello".to_string(),
            bot_id: "bot-007".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chat-add");
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["botId"], "bot-007");

        let json = serde_json::to_value(ChatEvent::Request {
            text: "draw a chart".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "chat-request");
        assert_eq!(json["text"], "draw a chart");
    }

    #[test]
    fn test_event_deserialization_from_wire_names() {
        let event: ChatEvent = serde_json::from_str(r#"{"type":"chat-done","role":"assistant","content":"ok","botId":"b"}"#).unwrap();
        assert_eq!(
            event,
            ChatEvent::Done {
                role: Role::Assistant,
                content: "ok".to_string(),
                bot_id: "b".to_string(),
            }
        );

        let event: ChatEvent = serde_json::from_str(r#"{"type":"chat-stop"}"#).unwrap();
        assert_eq!(event, ChatEvent::Stop);
    }
}
