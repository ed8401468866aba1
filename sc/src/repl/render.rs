//! Terminal rendering of bus events
//!
//! The renderer mirrors the conversation from `chat-add` / `chat-update`
//! snapshots and prints each assistant block incrementally. Assistant text goes
//! through a [`TagMachine`], so `<think>` sections come out dimmed and `<chart>`
//! sections labelled even when a tag is split across deltas. Text ahead of a
//! partial tag is printed as soon as it arrives; the partial tag waits for the
//! next delta or `chat-done`.

use std::io::{self, Write};

use colored::Colorize;
use tracing::{debug, warn};

use crate::events::ChatEvent;
use crate::llm::{MessageBlock, Role};
use crate::tags::{TagMachine, Token};

/// Which tagged section the assistant text is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Plain,
    Think,
    Chart,
}

#[derive(Debug, Clone, Copy)]
enum Paint {
    Dim,
    Chart,
    Label,
}

/// Prints assistant blocks as they stream and keeps a transcript
pub struct Renderer {
    out: Box<dyn Write + Send>,
    styled: bool,
    machine: TagMachine,
    transcript: Vec<MessageBlock>,
    /// Bytes of the open assistant block already fed to the tag machine
    fed: usize,
    assistant_open: bool,
    section: Section,
}

impl Renderer {
    /// Create a renderer writing to `out`, recognizing `tags`
    pub fn new<S: AsRef<str>>(out: Box<dyn Write + Send>, styled: bool, tags: &[S]) -> Self {
        debug!(styled, "Renderer::new: called");
        Self {
            out,
            styled,
            machine: TagMachine::new(tags),
            transcript: Vec::new(),
            fed: 0,
            assistant_open: false,
            section: Section::Plain,
        }
    }

    /// Renderer on stdout, colored when stdout is a terminal
    pub fn stdout<S: AsRef<str>>(tags: &[S]) -> Self {
        use std::io::IsTerminal;
        let styled = io::stdout().is_terminal();
        Self::new(Box::new(io::stdout()), styled, tags)
    }

    /// Conversation as seen on the bus
    pub fn transcript(&self) -> &[MessageBlock] {
        &self.transcript
    }

    /// Apply one bus event
    pub fn handle(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Add { role, content, .. } => {
                self.close_assistant(false);
                self.transcript.push(MessageBlock::new(*role, content.clone()));
                if *role == Role::Assistant {
                    self.assistant_open = true;
                    self.feed_snapshot(content);
                }
            }
            ChatEvent::Update { role, content, .. } => {
                match self.transcript.last_mut() {
                    Some(block) if block.role == *role => block.content.clone_from(content),
                    _ => {
                        warn!(%role, "Renderer::handle: update without matching block");
                        self.transcript.push(MessageBlock::new(*role, content.clone()));
                    }
                }
                if *role == Role::Assistant {
                    self.assistant_open = true;
                    self.feed_snapshot(content);
                }
            }
            ChatEvent::Done { .. } => self.close_assistant(true),
            ChatEvent::Reset => {
                debug!("Renderer::handle: reset");
                self.close_assistant(false);
                self.transcript.clear();
            }
            ChatEvent::Start { .. } | ChatEvent::Request { .. } | ChatEvent::Stop => {}
        }
    }

    /// Feed the unseen suffix of an assistant snapshot
    fn feed_snapshot(&mut self, content: &str) {
        let suffix = match content.get(self.fed..) {
            Some(suffix) => suffix,
            None => {
                warn!(fed = self.fed, len = content.len(), "Renderer::feed_snapshot: snapshot shrank, re-rendering");
                self.machine.reset();
                content
            }
        };
        let mut tokens = self.machine.feed(suffix);
        tokens.extend(self.machine.take_text());
        self.fed = content.len();
        self.render(tokens);
    }

    fn close_assistant(&mut self, newline: bool) {
        if !self.assistant_open {
            return;
        }
        let tokens = self.machine.finish();
        self.render(tokens);
        if newline {
            self.write("\n");
        }
        self.assistant_open = false;
        self.fed = 0;
        self.section = Section::Plain;
    }

    fn render(&mut self, tokens: Vec<Token>) {
        for token in tokens {
            let piece = match token {
                Token::Text { content } => match self.section {
                    Section::Plain => content,
                    Section::Think => self.paint(&content, Paint::Dim),
                    Section::Chart => self.paint(&content, Paint::Chart),
                },
                Token::Tag { name, raw } => match name.as_str() {
                    "think" => {
                        self.section = Section::Think;
                        self.paint("[thinking] ", Paint::Label)
                    }
                    "/think" => {
                        self.section = Section::Plain;
                        self.paint(" [/thinking]\n", Paint::Label)
                    }
                    "chart" => {
                        self.section = Section::Chart;
                        self.paint("[chart]\n", Paint::Label)
                    }
                    "/chart" => {
                        self.section = Section::Plain;
                        self.paint("\n[/chart]\n", Paint::Label)
                    }
                    _ => self.paint(&raw, Paint::Dim),
                },
            };
            self.write(&piece);
        }
    }

    fn paint(&self, text: &str, paint: Paint) -> String {
        if !self.styled {
            return text.to_string();
        }
        match paint {
            Paint::Dim => text.dimmed().to_string(),
            Paint::Chart => text.bright_magenta().to_string(),
            Paint::Label => text.bright_black().italic().to_string(),
        }
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}
