//! Streaming chat client
//!
//! Owns one conversation, drives one streaming exchange at a time, and publishes
//! every block transition on the event bus.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decode::{FrameDecoder, StreamFrame};
use super::transport::ChatTransport;
use super::types::{ChatRequest, MessageBlock, Role};
use super::LlmError;
use crate::config::GenerationConfig;
use crate::events::EventEmitter;

/// Prefix of the assistant block that reports a failed turn
pub const ERROR_PREFIX: &str = "**Error**: ";

/// Cancellation slot for the in-flight request of one client
///
/// Cloneable, so a Ctrl+C handler or a bus subscriber can stop a turn while
/// `send` holds the client.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    /// Cancel the in-flight request, if any
    pub fn stop(&self) {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = slot.as_ref() {
            debug!("StopHandle::stop: cancelling in-flight request");
            token.cancel();
        }
    }

    /// Check whether a request is in flight
    pub fn is_armed(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Install a fresh token for a new request, cancelling any previous one
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(token.clone()) {
            debug!("StopHandle::arm: replacing in-flight request");
            previous.cancel();
        }
        token
    }

    fn disarm(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Conversation history plus the open block
#[derive(Debug, Default)]
struct Conversation {
    blocks: Vec<MessageBlock>,
    /// Index of the open block; always the last one when set
    current: Option<usize>,
}

/// Streaming chat client for one conversation
pub struct StreamingClient {
    transport: Arc<dyn ChatTransport>,
    emitter: EventEmitter,
    model: String,
    generation: GenerationConfig,
    session_id: Option<String>,
    conversation: Conversation,
    inflight: StopHandle,
}

impl StreamingClient {
    /// Create a client publishing through `emitter`
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        emitter: EventEmitter,
        model: impl Into<String>,
        generation: GenerationConfig,
    ) -> Self {
        let model = model.into();
        debug!(%model, bot_id = emitter.bot_id(), "StreamingClient::new: called");
        Self {
            transport,
            emitter,
            model,
            generation,
            session_id: None,
            conversation: Conversation::default(),
            inflight: StopHandle::default(),
        }
    }

    /// Attach a caller-owned session identifier
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn bot_id(&self) -> &str {
        self.emitter.bot_id()
    }

    /// Conversation history in chronological order
    pub fn messages(&self) -> &[MessageBlock] {
        &self.conversation.blocks
    }

    /// The open block, if any
    pub fn current(&self) -> Option<&MessageBlock> {
        self.conversation.current.and_then(|i| self.conversation.blocks.get(i))
    }

    /// Check whether a request is in flight
    pub fn is_streaming(&self) -> bool {
        self.inflight.is_armed()
    }

    /// Handle that cancels this client's in-flight request
    pub fn stop_handle(&self) -> StopHandle {
        self.inflight.clone()
    }

    /// Request cancellation of the in-flight request; no-op when idle
    pub fn stop(&self) {
        debug!("stop: called");
        self.inflight.stop();
    }

    /// Stop, then forget the whole conversation
    pub fn reset(&mut self) {
        debug!(blocks = self.conversation.blocks.len(), "reset: called");
        self.stop();
        self.conversation = Conversation::default();
    }

    /// Append text to the conversation under `role`
    ///
    /// Opens a new block (`chat-add`) when there is no open block or its role
    /// differs; otherwise extends the open block (`chat-update`).
    pub fn push(&mut self, role: Role, text: &str) {
        let conversation = &mut self.conversation;
        let current = conversation.current;
        match current {
            Some(index) if conversation.blocks[index].role == role => {
                let block = &mut conversation.blocks[index];
                block.content.push_str(text);
                self.emitter.chat_update(block);
            }
            _ => {
                conversation.blocks.push(MessageBlock::new(role, text));
                let index = conversation.blocks.len() - 1;
                conversation.current = Some(index);
                self.emitter.chat_add(&conversation.blocks[index]);
            }
        }
    }

    /// Send `prompt` and stream the reply into the conversation
    ///
    /// Never fails: transport errors become an assistant error block and
    /// cancellation ends the turn quietly. `chat-done` is always emitted.
    pub async fn send(&mut self, prompt: &str) {
        if prompt.is_empty() {
            debug!("send: empty prompt, ignoring");
            return;
        }
        info!(session_id = ?self.session_id, bot_id = self.bot_id(), "send: starting turn");

        self.push(Role::User, prompt);
        // Armed before chat-start so a start handler can already stop the turn
        let token = self.inflight.arm();
        self.emitter.chat_start();

        match self.stream_turn(&token).await {
            Ok(()) => debug!("send: stream completed"),
            Err(e) if e.is_cancelled() => info!("send: turn cancelled"),
            Err(e) => {
                warn!(error = %e, "send: turn failed");
                self.push(Role::Assistant, &format!("{}{}", ERROR_PREFIX, e.user_message()));
            }
        }

        self.finish_turn();
    }

    fn finish_turn(&mut self) {
        let (role, content) = self
            .conversation
            .blocks
            .last()
            .map(|b| (b.role, b.content.as_str()))
            .unwrap_or((Role::Assistant, ""));
        self.emitter.chat_done(role, content);

        self.inflight.disarm();
        self.conversation.current = None;
    }

    fn build_request(&self) -> ChatRequest {
        ChatRequest::new(self.model.clone(), self.conversation.blocks.clone(), &self.generation)
    }

    async fn stream_turn(&mut self, token: &CancellationToken) -> Result<(), LlmError> {
        let request = self.build_request();

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(LlmError::Cancelled),
            opened = self.transport.open(&request) => opened?,
        };

        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(LlmError::Cancelled),
                next = stream.next() => next,
            };

            let (frames, end_of_body) = match next {
                Some(chunk) => (decoder.feed(&chunk?), false),
                None => (decoder.finish(), true),
            };
            for frame in frames {
                match frame {
                    StreamFrame::Delta(text) => self.push(Role::Assistant, &text),
                    StreamFrame::Done => {
                        debug!("stream_turn: received [DONE]");
                        return Ok(());
                    }
                }
            }
            if end_of_body {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChatEvent, EventBus, EventKind};
    use crate::llm::transport::mock::{Script, ScriptedTransport, sse_body};

    fn client_with(scripts: Vec<Script>) -> (StreamingClient, Arc<EventBus>, Arc<ScriptedTransport>) {
        let bus = Arc::new(EventBus::new(100));
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let client = StreamingClient::new(
            transport.clone(),
            bus.emitter_for("bot-test"),
            "test-model",
            GenerationConfig::default(),
        );
        (client, bus, transport)
    }

    fn record(bus: &EventBus) -> Arc<Mutex<Vec<ChatEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Start, EventKind::Add, EventKind::Update, EventKind::Done] {
            let log = Arc::clone(&log);
            bus.on(kind, move |event| log.lock().unwrap().push(event.clone()));
        }
        log
    }

    fn types(log: &Arc<Mutex<Vec<ChatEvent>>>) -> Vec<&'static str> {
        log.lock().unwrap().iter().map(|e| e.event_type()).collect()
    }

    #[test]
    fn test_push_accumulates_one_block() {
        let (mut client, bus, _) = client_with(vec![]);
        let log = record(&bus);

        for piece in ["a", "b", "c", "d"] {
            client.push(Role::Assistant, piece);
        }

        assert_eq!(types(&log), vec!["chat-add", "chat-update", "chat-update", "chat-update"]);
        assert_eq!(client.messages(), &[MessageBlock::assistant("abcd")]);
        assert_eq!(client.current().map(|b| b.content.as_str()), Some("abcd"));
    }

    #[test]
    fn test_push_role_switch_opens_new_block() {
        let (mut client, bus, _) = client_with(vec![]);
        let log = record(&bus);

        client.push(Role::User, "question");
        client.push(Role::Assistant, "answer");

        assert_eq!(types(&log), vec!["chat-add", "chat-add"]);
        assert_eq!(
            client.messages(),
            &[MessageBlock::user("question"), MessageBlock::assistant("answer")]
        );
    }

    #[test]
    fn test_events_carry_snapshots_and_bot_id() {
        let (mut client, bus, _) = client_with(vec![]);
        let log = record(&bus);

        client.push(Role::Assistant, "x");
        client.push(Role::Assistant, "y");

        let log = log.lock().unwrap();
        assert_eq!(log[0].content(), Some("x"));
        assert_eq!(log[1].content(), Some("xy"));
        assert!(log.iter().all(|e| e.bot_id() == Some("bot-test")));
    }

    #[tokio::test]
    async fn test_send_streams_reply() {
        let body = sse_body(&["Hel", "lo", " there"]);
        let (mut client, bus, transport) = client_with(vec![Script::Chunks(vec![body.into_bytes()])]);
        let log = record(&bus);

        client.send("hi").await;

        assert_eq!(
            types(&log),
            vec!["chat-add", "chat-start", "chat-add", "chat-update", "chat-update", "chat-done"]
        );
        assert_eq!(
            client.messages(),
            &[MessageBlock::user("hi"), MessageBlock::assistant("Hello there")]
        );
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&ChatEvent::Done {
                role: Role::Assistant,
                content: "Hello there".to_string(),
                bot_id: "bot-test".to_string(),
            })
        );
        assert!(client.current().is_none());
        assert!(!client.is_streaming());
        assert_eq!(transport.sent_messages(), vec![vec![MessageBlock::user("hi")]]);
    }

    #[tokio::test]
    async fn test_send_empty_prompt_is_noop() {
        let (mut client, bus, transport) = client_with(vec![]);
        let log = record(&bus);

        client.send("").await;

        assert!(log.lock().unwrap().is_empty());
        assert!(client.messages().is_empty());
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_carries_history() {
        let (mut client, _bus, transport) = client_with(vec![
            Script::Chunks(vec![sse_body(&["one"]).into_bytes()]),
            Script::Chunks(vec![sse_body(&["two"]).into_bytes()]),
        ]);

        client.send("first").await;
        client.send("second").await;

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            vec![
                MessageBlock::user("first"),
                MessageBlock::assistant("one"),
                MessageBlock::user("second"),
            ]
        );
        assert_eq!(client.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_send_no_loss_with_ragged_chunks() {
        let body = sse_body(&["Grüße ", "aus ", "東京 ", "🎉"]).into_bytes();
        // Three-byte reads cut through frames and multi-byte characters alike
        let chunks: Vec<Vec<u8>> = body.chunks(3).map(<[u8]>::to_vec).collect();
        let (mut client, _bus, _) = client_with(vec![Script::Chunks(chunks)]);

        client.send("hi").await;

        assert_eq!(client.messages()[1].content, "Grüße aus 東京 🎉");
    }

    #[tokio::test]
    async fn test_send_ignores_content_after_done_sentinel() {
        let mut body = sse_body(&["kept"]);
        body.push_str(&sse_body(&["dropped"]));
        let (mut client, _bus, _) = client_with(vec![Script::Chunks(vec![body.into_bytes()])]);

        client.send("hi").await;

        assert_eq!(client.messages()[1].content, "kept");
    }

    #[tokio::test]
    async fn test_send_api_error_becomes_error_block() {
        let (mut client, bus, _) = client_with(vec![Script::Error {
            status: 401,
            message: "Invalid API key".to_string(),
        }]);
        let log = record(&bus);

        client.send("hi").await;

        assert_eq!(client.messages()[1], MessageBlock::assistant("**Error**: Invalid API key"));
        assert_eq!(
            log.lock().unwrap().last().and_then(|e| e.content().map(str::to_string)),
            Some("**Error**: Invalid API key".to_string())
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_appends_error() {
        let chunks = vec![sse_body(&["Hel", "lo"]).replace("data: [DONE]\n\n", "").into_bytes()];
        let err = LlmError::InvalidResponse("connection reset".to_string());
        let (mut client, bus, _) = client_with(vec![Script::FailAfter(chunks, err)]);
        let log = record(&bus);

        client.send("hi").await;

        let expected = "Hello**Error**: Invalid response: connection reset";
        assert_eq!(
            client.messages(),
            &[MessageBlock::user("hi"), MessageBlock::assistant(expected)]
        );
        assert_eq!(
            types(&log),
            vec!["chat-add", "chat-start", "chat-add", "chat-update", "chat-update", "chat-done"]
        );
        assert_eq!(
            log.lock().unwrap().last().and_then(|e| e.content().map(str::to_string)),
            Some(expected.to_string())
        );
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn test_stop_mid_stream_keeps_partial_content() {
        let chunks = vec![sse_body(&["Hel", "lo"]).replace("data: [DONE]\n\n", "").into_bytes()];
        let (mut client, bus, _) = client_with(vec![Script::Hang(chunks)]);
        let log = record(&bus);

        let stop = client.stop_handle();
        bus.on(EventKind::Update, move |event| {
            if event.content() == Some("Hello") {
                stop.stop();
            }
        });

        client.send("hi").await;

        assert_eq!(
            client.messages(),
            &[MessageBlock::user("hi"), MessageBlock::assistant("Hello")]
        );
        assert_eq!(log.lock().unwrap().last().and_then(|e| e.content().map(str::to_string)), Some("Hello".to_string()));
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn test_stop_from_start_handler_cancels_turn() {
        let (mut client, bus, transport) = client_with(vec![Script::Hang(vec![])]);
        let stop = client.stop_handle();
        bus.on(EventKind::Start, move |_| stop.stop());

        client.send("hi").await;

        // Cancelled before the transport was opened
        assert!(transport.sent_messages().is_empty());
        assert_eq!(client.messages(), &[MessageBlock::user("hi")]);
    }

    #[tokio::test]
    async fn test_stop_before_first_delta_emits_done_with_user_block() {
        let (mut client, bus, _) = client_with(vec![Script::Hang(vec![])]);
        let log = record(&bus);

        let stop = client.stop_handle();
        let canceller = tokio::spawn(async move {
            while !stop.is_armed() {
                tokio::task::yield_now().await;
            }
            stop.stop();
        });

        client.send("hi").await;
        canceller.await.unwrap();

        assert_eq!(client.messages(), &[MessageBlock::user("hi")]);
        assert_eq!(
            log.lock().unwrap().last(),
            Some(&ChatEvent::Done {
                role: Role::User,
                content: "hi".to_string(),
                bot_id: "bot-test".to_string(),
            })
        );
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (client, _bus, _) = client_with(vec![]);
        client.stop();
        client.stop();
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (mut client, _bus, _) = client_with(vec![Script::Chunks(vec![sse_body(&["x"]).into_bytes()])]);
        client.send("hi").await;
        assert_eq!(client.messages().len(), 2);

        client.reset();
        assert!(client.messages().is_empty());
        assert!(client.current().is_none());
        assert!(!client.is_streaming());

        client.reset();
        assert!(client.messages().is_empty());
        assert!(client.current().is_none());
        assert!(!client.is_streaming());
        assert_eq!(client.bot_id(), "bot-test");
    }

    #[tokio::test]
    async fn test_push_after_turn_opens_new_block() {
        let (mut client, _bus, _) = client_with(vec![Script::Chunks(vec![sse_body(&["x"]).into_bytes()])]);
        client.send("hi").await;

        client.push(Role::Assistant, "later");

        assert_eq!(client.messages().len(), 3);
        assert_eq!(client.messages()[2], MessageBlock::assistant("later"));
    }
}
