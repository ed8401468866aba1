//! REPL session management

use std::sync::{Arc, Mutex, PoisonError};

use colored::Colorize;
use eyre::{Context, Result, eyre};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::render::Renderer;
use crate::events::{ChatEvent, EventBus, EventKind, SubscriptionId};
use crate::llm::{ERROR_PREFIX, MessageBlock, Role};

/// Interactive session over an event bus
///
/// The session never calls the client. It emits `chat-request`, `chat-stop`
/// and `chat-reset`, and renders what comes back on the bus.
pub struct ReplSession {
    bus: Arc<EventBus>,
    bot_id: String,
    model: String,
    renderer: Arc<Mutex<Renderer>>,
    subscriptions: Vec<SubscriptionId>,
}

impl ReplSession {
    /// Create a session rendering events from `bot_id` through `renderer`
    pub fn new(bus: Arc<EventBus>, bot_id: impl Into<String>, model: impl Into<String>, renderer: Renderer) -> Self {
        let bot_id = bot_id.into();
        debug!(%bot_id, "ReplSession::new: called");
        let renderer = Arc::new(Mutex::new(renderer));

        let subscriptions = [EventKind::Add, EventKind::Update, EventKind::Done, EventKind::Reset]
            .into_iter()
            .map(|kind| {
                let renderer = Arc::clone(&renderer);
                let bot_id = bot_id.clone();
                bus.on(kind, move |event| {
                    if event.bot_id().is_some_and(|id| id != bot_id) {
                        return;
                    }
                    renderer.lock().unwrap_or_else(PoisonError::into_inner).handle(event);
                })
            })
            .collect();

        Self {
            bus,
            bot_id,
            model: model.into(),
            renderer,
            subscriptions,
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        // Create readline editor for proper line editing
        let mut rl = DefaultEditor::new().map_err(|e| eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }

                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input) {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.submit(input).await?;
                        println!();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C at the prompt - just show new prompt
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre!("Readline error: {}", err));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Send one prompt, stream the reply, and return the final block
    ///
    /// Fails when the turn ended in an error block.
    pub async fn ask(&mut self, prompt: &str) -> Result<MessageBlock> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(eyre!("Prompt is empty"));
        }

        let block = self.submit(prompt).await?;
        if block.role == Role::Assistant
            && let Some(message) = block.content.strip_prefix(ERROR_PREFIX)
        {
            return Err(eyre!("Request failed: {}", message));
        }
        Ok(block)
    }

    /// Conversation as rendered so far
    pub fn transcript(&self) -> Vec<MessageBlock> {
        self.renderer.lock().unwrap_or_else(PoisonError::into_inner).transcript().to_vec()
    }

    /// Emit a request and wait for this bot's `chat-done`
    ///
    /// Ctrl+C while waiting emits `chat-stop`; the turn still finishes with
    /// `chat-done` carrying the partial reply. A press before this bot's
    /// `chat-start` is held until the turn starts.
    async fn submit(&self, text: &str) -> Result<MessageBlock> {
        debug!(len = text.len(), "submit: called");
        let mut rx = self.bus.subscribe();
        self.bus.emit(ChatEvent::Request { text: text.to_string() });

        let mut turn = TurnState::default();
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(ChatEvent::Start { bot_id }) if bot_id == self.bot_id => self.turn_started(&mut turn),
                    Ok(ChatEvent::Done { role, content, bot_id }) if bot_id == self.bot_id => {
                        debug!(%role, "submit: turn done");
                        return Ok(MessageBlock::new(role, content));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "submit: event receiver lagged"),
                    Err(RecvError::Closed) => return Err(eyre!("Event bus closed")),
                },
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl+C")?;
                    println!("{}", " ^C".dimmed());
                    self.interrupt(&mut turn);
                }
            }
        }
    }

    /// Stop the turn now if it has started, otherwise once it does
    fn interrupt(&self, turn: &mut TurnState) {
        if turn.interrupt() {
            self.bus.emit(ChatEvent::Stop);
        } else {
            debug!("interrupt: turn not started yet, holding stop");
        }
    }

    fn turn_started(&self, turn: &mut TurnState) {
        if turn.start() {
            debug!("turn_started: emitting held stop");
            self.bus.emit(ChatEvent::Stop);
        }
    }

    /// Print welcome message
    fn print_welcome(&self) {
        println!();
        println!("{}", "streamchat".bright_cyan().bold());
        println!("Model: {}", self.model);
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    /// Handle slash commands
    fn handle_slash_command(&mut self, input: &str) -> SlashResult {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                self.print_help();
                SlashResult::Continue
            }
            "/quit" | "/q" | "/exit" => SlashResult::Quit,
            "/reset" | "/clear" | "/c" => {
                self.bus.emit(ChatEvent::Reset);
                println!("{}", "Conversation cleared.".dimmed());
                SlashResult::Continue
            }
            "/history" => {
                self.print_history();
                SlashResult::Continue
            }
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                SlashResult::Continue
            }
        }
    }

    /// Print help message
    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:14} Show this help", "/help".yellow());
        println!("  {:14} Exit the REPL", "/quit".yellow());
        println!("  {:14} Clear conversation history", "/reset".yellow());
        println!("  {:14} Show conversation history", "/history".yellow());
        println!();
        println!("Press {} while a reply streams to stop it.", "Ctrl+C".yellow());
        println!();
    }

    /// Print conversation history
    fn print_history(&self) {
        let transcript = self.transcript();
        if transcript.is_empty() {
            println!("{}", "No conversation history.".dimmed());
            return;
        }

        println!();
        println!("{}", "Conversation History:".bright_cyan());
        for (i, block) in transcript.iter().enumerate() {
            let role = match block.role {
                Role::User => "User".bright_green(),
                Role::Assistant => "Assistant".bright_blue(),
            };
            let preview: String = block.content.chars().take(50).collect();
            let preview = if block.content.chars().count() > 50 {
                format!("{}...", preview)
            } else {
                preview
            };
            println!("  {}. {}: {}", i + 1, role, preview);
        }
        println!();
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.off(id);
        }
    }
}

/// Ctrl+C bookkeeping for one submitted turn
#[derive(Debug, Default)]
struct TurnState {
    started: bool,
    stop_requested: bool,
}

impl TurnState {
    /// Record a Ctrl+C; true when `chat-stop` should go out now
    fn interrupt(&mut self) -> bool {
        self.stop_requested = true;
        self.started
    }

    /// Record this bot's `chat-start`; true when a stop is owed
    fn start(&mut self) -> bool {
        self.started = true;
        self.stop_requested
    }
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}
