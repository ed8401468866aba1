//! Incremental control-tag tokenizer
//!
//! Splits streamed text into literal text and whitelisted control tags such as
//! `<think>` / `</think>`. A tag may be cut anywhere by chunk boundaries; the
//! machine keeps its state between [`TagMachine::feed`] calls and never drops
//! input: anything that does not turn out to be a whitelisted tag comes back
//! as text. Text is only emitted at a whitelisted tag or by
//! [`TagMachine::finish`], so the token sequence does not depend on where the
//! input was split.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

/// Tags recognized when no whitelist is given
pub const DEFAULT_ALLOWED_TAGS: &[&str] = &["think", "/think", "chart", "/chart"];

/// Output of the tokenizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Token {
    /// Literal text
    Text { content: String },
    /// A whitelisted tag; `name` is lowercased, `raw` is `<name>`
    Tag { name: String, raw: String },
}

impl Token {
    pub fn text(content: impl Into<String>) -> Self {
        Token::Text {
            content: content.into(),
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        let name = name.into();
        let raw = format!("<{}>", name);
        Token::Tag { name, raw }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Ordinary text
    Text,
    /// Consumed `<`, deciding whether a tag starts
    TagOpen,
    /// Accumulating a tag name up to `>`
    TagName,
}

/// Character-level tag tokenizer with state persisted across chunks
#[derive(Debug, Clone)]
pub struct TagMachine {
    mode: Mode,
    /// Literal text not yet emitted
    pending: String,
    /// Lowercased tag name, for whitelist matching
    tag_name: String,
    /// Tag name as written, for literal reconstruction
    tag_source: String,
    allowed: HashSet<String>,
}

impl Default for TagMachine {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_TAGS)
    }
}

impl TagMachine {
    /// Create a machine recognizing `allowed` tag names (case-insensitive)
    ///
    /// Closing tags are listed by their full name, e.g. `/think`.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed: HashSet<String> = allowed.into_iter().map(|t| t.as_ref().to_lowercase()).collect();
        debug!(tag_count = allowed.len(), "TagMachine::new: called");
        Self {
            mode: Mode::Text,
            pending: String::new(),
            tag_name: String::new(),
            tag_source: String::new(),
            allowed,
        }
    }

    /// Check whether `name` is whitelisted
    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(&name.to_lowercase())
    }

    /// Check whether a partial tag or text is held back
    pub fn has_pending(&self) -> bool {
        self.mode != Mode::Text || !self.pending.is_empty()
    }

    /// Process a chunk and return the tokens it completed
    ///
    /// Trailing text and partial tag attempts stay buffered until more input
    /// or [`finish`](Self::finish) arrives, so a tag which turns out not to be
    /// whitelisted merges back into the surrounding text.
    pub fn feed(&mut self, chunk: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        for ch in chunk.chars() {
            self.step(ch, &mut tokens);
        }
        tokens
    }

    /// Take the buffered text ahead of any partial tag attempt
    ///
    /// For display only: text taken here is split where the caller took it,
    /// so tokens no longer match a single-feed run. The partial tag itself
    /// stays buffered.
    pub fn take_text(&mut self) -> Option<Token> {
        if self.pending.is_empty() {
            return None;
        }
        Some(Token::text(std::mem::take(&mut self.pending)))
    }

    /// Flush everything retained and return to the initial state
    ///
    /// An unfinished tag attempt comes back as text, together with the text
    /// before it, as one token.
    pub fn finish(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        match self.mode {
            Mode::Text => {}
            Mode::TagOpen => self.pending.push('<'),
            Mode::TagName => {
                debug!(partial = %self.tag_source, "TagMachine::finish: unterminated tag");
                self.pending.push('<');
                self.pending.push_str(&self.tag_source);
            }
        }
        self.flush_text(&mut tokens);
        self.reset();
        tokens
    }

    /// Discard all retained state
    pub fn reset(&mut self) {
        self.mode = Mode::Text;
        self.pending.clear();
        self.tag_name.clear();
        self.tag_source.clear();
    }

    fn flush_text(&mut self, tokens: &mut Vec<Token>) {
        if !self.pending.is_empty() {
            tokens.push(Token::Text {
                content: std::mem::take(&mut self.pending),
            });
        }
    }

    fn step(&mut self, ch: char, tokens: &mut Vec<Token>) {
        match self.mode {
            Mode::Text => {
                if ch == '<' {
                    self.mode = Mode::TagOpen;
                } else {
                    self.pending.push(ch);
                }
            }
            Mode::TagOpen => {
                if ch.is_ascii_alphabetic() || ch == '/' {
                    self.start_name(ch);
                } else if ch == '<' {
                    // The earlier `<` was literal; this one may still open a tag
                    self.pending.push('<');
                } else {
                    self.pending.push('<');
                    self.pending.push(ch);
                    self.mode = Mode::Text;
                }
            }
            Mode::TagName => {
                if ch == '>' {
                    self.close_tag(tokens);
                } else if ch.is_ascii_alphanumeric() || ch == '/' {
                    self.tag_name.push(ch.to_ascii_lowercase());
                    self.tag_source.push(ch);
                } else {
                    self.pending.push('<');
                    self.pending.push_str(&self.tag_source);
                    self.pending.push(ch);
                    self.clear_tag();
                }
            }
        }
    }

    fn start_name(&mut self, ch: char) {
        self.tag_name.push(ch.to_ascii_lowercase());
        self.tag_source.push(ch);
        self.mode = Mode::TagName;
    }

    fn close_tag(&mut self, tokens: &mut Vec<Token>) {
        if self.allowed.contains(&self.tag_name) {
            self.flush_text(tokens);
            tokens.push(Token::tag(std::mem::take(&mut self.tag_name)));
        } else {
            debug!(tag = %self.tag_name, "TagMachine::close_tag: not whitelisted, keeping as text");
            self.pending.push('<');
            self.pending.push_str(&self.tag_source);
            self.pending.push('>');
        }
        self.clear_tag();
    }

    fn clear_tag(&mut self) {
        self.tag_name.clear();
        self.tag_source.clear();
        self.mode = Mode::Text;
    }
}
