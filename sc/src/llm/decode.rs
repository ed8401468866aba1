//! Incremental decoding of a streamed response body
//!
//! Network reads split the body at arbitrary byte offsets. Decoding runs in
//! three stateful layers, each retaining whatever it cannot complete yet:
//! bytes → UTF-8 text ([`Utf8Decoder`]) → lines ([`LineBuffer`]) → frames
//! ([`FrameDecoder`]).

use tracing::{debug, warn};

use super::types::StreamFrameBody;

/// Prefix of a data frame line
pub const DATA_PREFIX: &str = "data:";

/// Payload of the terminal frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// Stateful UTF-8 decoder
///
/// A multi-byte sequence cut by a chunk boundary is held back until the rest of
/// it arrives. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, returning all text that is complete so far
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush a dangling partial sequence at end of stream
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        debug!(bytes = self.pending.len(), "Utf8Decoder::finish: truncated sequence");
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }

    /// Number of bytes held back
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Splits decoded text on `\n`, retaining the trailing incomplete line
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed (without the `\n`)
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=line_end).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Take the unterminated remainder
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// A meaningful frame of the response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// A non-empty text fragment
    Delta(String),
    /// The terminal sentinel
    Done,
}

/// Interpret one line of the stream
///
/// Returns `None` for lines that carry nothing: non-data lines, frames without
/// delta text, and malformed JSON (logged and dropped).
pub fn parse_line(line: &str) -> Option<StreamFrame> {
    let data = line.strip_prefix(DATA_PREFIX)?.trim();
    if data == DONE_SENTINEL {
        return Some(StreamFrame::Done);
    }

    match serde_json::from_str::<StreamFrameBody>(data) {
        Ok(frame) => frame.into_delta().map(StreamFrame::Delta),
        Err(e) => {
            warn!(error = %e, %data, "parse_line: failed to parse stream data, skipping");
            None
        }
    }
}

/// Bytes-to-frames decoder for one response body
#[derive(Debug, Default)]
pub struct FrameDecoder {
    utf8: Utf8Decoder,
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning the frames it completed in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        let text = self.utf8.decode(chunk);
        self.lines.push(&text).iter().filter_map(|line| parse_line(line)).collect()
    }

    /// Drain everything retained at end of body
    ///
    /// A final line without a trailing newline still counts as a frame.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let tail = self.utf8.finish();
        let mut frames: Vec<StreamFrame> = self.lines.push(&tail).iter().filter_map(|line| parse_line(line)).collect();
        if let Some(rest) = self.lines.take_remainder() {
            debug!(len = rest.len(), "FrameDecoder::finish: unterminated final line");
            frames.extend(parse_line(&rest));
        }
        frames
    }
}
