//! Routes external bus signals into a streaming client
//!
//! Front ends never touch the [`StreamingClient`] directly. They emit
//! `chat-request`, `chat-stop` and `chat-reset` on the bus; the controller
//! turns those into calls on the client it owns.
//!
//! Bus handlers run synchronously inside `emit`, so they only do two things:
//! cancel the in-flight turn through a [`StopHandle`] and queue a command for
//! the controller task. The task runs commands one at a time, which keeps the
//! client single-writer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{ChatEvent, EventBus, EventKind, SubscriptionId};
use crate::llm::{StopHandle, StreamingClient};

/// Work queued for the controller task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Send a prompt
    Send(String),
    /// Clear the conversation
    Reset,
}

/// Unregisters bus handlers when dropped
struct Subscriptions {
    bus: Arc<EventBus>,
    ids: Vec<SubscriptionId>,
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        debug!(count = self.ids.len(), "Subscriptions::drop: unregistering handlers");
        for id in self.ids.drain(..) {
            self.bus.off(id);
        }
    }
}

/// Owns a [`StreamingClient`] and drives it from bus signals
pub struct ChatController {
    client: StreamingClient,
    rx: mpsc::UnboundedReceiver<ControlCommand>,
    subscriptions: Subscriptions,
}

impl ChatController {
    /// Take ownership of `client` and subscribe to control signals on `bus`
    ///
    /// - `chat-request`: cancel the in-flight turn, then send the text once
    ///   the cancelled turn has finished; blank text is ignored
    /// - `chat-stop`: cancel the in-flight turn
    /// - `chat-reset`: cancel the in-flight turn, then clear the conversation
    pub fn new(client: StreamingClient, bus: Arc<EventBus>) -> Self {
        debug!(bot_id = client.bot_id(), "ChatController::new: called");
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = client.stop_handle();

        let mut ids = Vec::with_capacity(3);
        ids.push(bus.on(EventKind::Request, {
            let (stop, tx) = (stop.clone(), tx.clone());
            move |event| {
                if let ChatEvent::Request { text } = event {
                    debug!(len = text.len(), "ChatController: chat-request");
                    if text.trim().is_empty() {
                        debug!("ChatController: blank chat-request ignored");
                        return;
                    }
                    stop.stop();
                    queue(&tx, ControlCommand::Send(text.clone()));
                }
            }
        }));
        ids.push(bus.on(EventKind::Stop, {
            let stop = stop.clone();
            move |_| {
                debug!("ChatController: chat-stop");
                stop.stop();
            }
        }));
        ids.push(bus.on(EventKind::Reset, {
            let (stop, tx) = (stop, tx);
            move |_| {
                debug!("ChatController: chat-reset");
                stop.stop();
                queue(&tx, ControlCommand::Reset);
            }
        }));

        Self {
            client,
            rx,
            subscriptions: Subscriptions { bus, ids },
        }
    }

    /// Handle that cancels the controlled client's in-flight turn
    pub fn stop_handle(&self) -> StopHandle {
        self.client.stop_handle()
    }

    /// Number of bus handlers this controller holds
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.ids.len()
    }

    /// Process queued commands until `shutdown` fires
    ///
    /// Returns the client so callers can inspect the final conversation. The
    /// bus handlers are removed before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> StreamingClient {
        info!(bot_id = self.client.bot_id(), "ChatController started");

        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("ChatController::run: shutdown requested");
                    break;
                }
                command = self.rx.recv() => command,
            };

            match command {
                Some(ControlCommand::Send(text)) => {
                    let stop = self.client.stop_handle();
                    let send = self.client.send(&text);
                    tokio::pin!(send);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            debug!("ChatController::run: shutdown during turn, stopping");
                            stop.stop();
                            send.await;
                            break;
                        }
                        _ = &mut send => {}
                    }
                }
                Some(ControlCommand::Reset) => self.client.reset(),
                None => break,
            }
        }

        info!("ChatController stopped");
        drop(self.subscriptions);
        self.client
    }
}

fn queue(tx: &mpsc::UnboundedSender<ControlCommand>, command: ControlCommand) {
    if tx.send(command).is_err() {
        debug!("ChatController: controller stopped, dropping command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::GenerationConfig;
    use crate::llm::transport::mock::{Script, ScriptedTransport, sse_body};
    use crate::llm::{MessageBlock, Role};

    struct Harness {
        bus: Arc<EventBus>,
        transport: Arc<ScriptedTransport>,
        done_rx: mpsc::UnboundedReceiver<ChatEvent>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<StreamingClient>,
    }

    fn start(scripts: Vec<Script>) -> Harness {
        let bus = Arc::new(EventBus::new(100));
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let client = StreamingClient::new(
            transport.clone(),
            bus.emitter_for("bot-ctl"),
            "test-model",
            GenerationConfig::default(),
        );

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        bus.on(EventKind::Done, move |event| {
            let _ = done_tx.send(event.clone());
        });

        let controller = ChatController::new(client, Arc::clone(&bus));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(controller.run(shutdown.clone()));
        Harness {
            bus,
            transport,
            done_rx,
            shutdown,
            task,
        }
    }

    async fn next_done(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for chat-done")
            .expect("done channel closed")
    }

    async fn finish(h: Harness) -> StreamingClient {
        h.shutdown.cancel();
        h.task.await.unwrap()
    }

    #[test]
    fn test_drop_unregisters_handlers() {
        let bus = Arc::new(EventBus::new(10));
        let client = StreamingClient::new(
            Arc::new(ScriptedTransport::new(vec![])),
            bus.emitter_for("bot-ctl"),
            "test-model",
            GenerationConfig::default(),
        );

        let controller = ChatController::new(client, Arc::clone(&bus));
        assert_eq!(controller.subscription_count(), 3);
        assert!(!controller.stop_handle().is_armed());

        drop(controller);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_request_drives_client() {
        let mut h = start(vec![Script::Chunks(vec![sse_body(&["4"]).into_bytes()])]);

        h.bus.emit(ChatEvent::Request { text: "2+2?".into() });
        let done = next_done(&mut h.done_rx).await;
        assert_eq!(done.content(), Some("4"));
        assert_eq!(done.bot_id(), Some("bot-ctl"));

        let client = finish(h).await;
        assert_eq!(
            client.messages(),
            &[MessageBlock::user("2+2?"), MessageBlock::assistant("4")]
        );
    }

    #[tokio::test]
    async fn test_stop_signal_cancels_turn() {
        let first = format!("data: {}\n\n", serde_json::json!({"choices": [{"delta": {"content": "partial"}}]}));
        let mut h = start(vec![Script::Hang(vec![first.into_bytes()])]);

        // Stop once the first delta has been published
        let bus = Arc::clone(&h.bus);
        h.bus.on(EventKind::Add, move |event| {
            if matches!(event, ChatEvent::Add { role: Role::Assistant, .. }) {
                bus.emit(ChatEvent::Stop);
            }
        });

        h.bus.emit(ChatEvent::Request { text: "go".into() });
        let done = next_done(&mut h.done_rx).await;
        assert_eq!(done.content(), Some("partial"));

        let client = finish(h).await;
        assert!(!client.is_streaming());
        assert_eq!(client.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_request_leaves_turn_running() {
        let first = format!("data: {}\n\n", serde_json::json!({"choices": [{"delta": {"content": "partial"}}]}));
        let mut h = start(vec![Script::Hang(vec![first.into_bytes()])]);

        let (added_tx, mut added_rx) = mpsc::unbounded_channel();
        let bus = Arc::clone(&h.bus);
        h.bus.on(EventKind::Add, move |event| {
            if matches!(event, ChatEvent::Add { role: Role::Assistant, .. }) {
                bus.emit(ChatEvent::Request { text: "  \n".into() });
                bus.emit(ChatEvent::Request { text: String::new() });
                let _ = added_tx.send(());
            }
        });

        h.bus.emit(ChatEvent::Request { text: "go".into() });
        tokio::time::timeout(Duration::from_secs(5), added_rx.recv())
            .await
            .expect("timed out waiting for chat-add");

        // Still streaming: no chat-done and no second request
        let pending = tokio::time::timeout(Duration::from_millis(100), h.done_rx.recv()).await;
        assert!(pending.is_err(), "blank request ended the turn");
        assert_eq!(h.transport.sent_messages().len(), 1);

        h.bus.emit(ChatEvent::Stop);
        assert_eq!(next_done(&mut h.done_rx).await.content(), Some("partial"));

        let client = finish(h).await;
        assert_eq!(
            client.messages(),
            &[MessageBlock::user("go"), MessageBlock::assistant("partial")]
        );
    }

    #[tokio::test]
    async fn test_request_replaces_in_flight_turn() {
        let first = format!("data: {}\n\n", serde_json::json!({"choices": [{"delta": {"content": "slow"}}]}));
        let mut h = start(vec![
            Script::Hang(vec![first.into_bytes()]),
            Script::Chunks(vec![sse_body(&["fast"]).into_bytes()]),
        ]);

        let fired = Arc::new(Mutex::new(false));
        let bus = Arc::clone(&h.bus);
        h.bus.on(EventKind::Add, move |event| {
            if let ChatEvent::Add { content, .. } = event
                && content == "slow"
            {
                let mut fired = fired.lock().unwrap();
                if !*fired {
                    *fired = true;
                    bus.emit(ChatEvent::Request { text: "second".into() });
                }
            }
        });

        h.bus.emit(ChatEvent::Request { text: "first".into() });
        assert_eq!(next_done(&mut h.done_rx).await.content(), Some("slow"));
        assert_eq!(next_done(&mut h.done_rx).await.content(), Some("fast"));

        let sent = h.transport.sent_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            vec![
                MessageBlock::user("first"),
                MessageBlock::assistant("slow"),
                MessageBlock::user("second"),
            ]
        );
        finish(h).await;
    }

    #[tokio::test]
    async fn test_reset_signal_clears_conversation() {
        let mut h = start(vec![
            Script::Chunks(vec![sse_body(&["one"]).into_bytes()]),
            Script::Chunks(vec![sse_body(&["two"]).into_bytes()]),
        ]);

        h.bus.emit(ChatEvent::Request { text: "a".into() });
        next_done(&mut h.done_rx).await;
        h.bus.emit(ChatEvent::Reset);
        h.bus.emit(ChatEvent::Request { text: "b".into() });
        next_done(&mut h.done_rx).await;

        // The second request carries only the post-reset history
        let sent = h.transport.sent_messages();
        assert_eq!(sent[1], vec![MessageBlock::user("b")]);

        let client = finish(h).await;
        assert_eq!(client.messages(), &[MessageBlock::user("b"), MessageBlock::assistant("two")]);
    }

    #[tokio::test]
    async fn test_shutdown_unsubscribes() {
        let h = start(vec![]);
        let before = h.bus.subscriber_count();
        let bus = Arc::clone(&h.bus);
        finish(h).await;
        assert_eq!(bus.subscriber_count(), before - 3);

        // Signals after shutdown are harmless
        bus.emit(ChatEvent::Request { text: "late".into() });
        bus.emit(ChatEvent::Stop);
    }

    #[tokio::test]
    async fn test_shutdown_during_turn_finalizes() {
        let mut h = start(vec![Script::Hang(vec![])]);

        let shutdown = h.shutdown.clone();
        h.bus.on(EventKind::Start, move |_| shutdown.cancel());
        h.bus.emit(ChatEvent::Request { text: "hang".into() });

        let done = next_done(&mut h.done_rx).await;
        assert_eq!(done.content(), Some("hang"));
        let client = h.task.await.unwrap();
        assert!(!client.is_streaming());
    }
}
