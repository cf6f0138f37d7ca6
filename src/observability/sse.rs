//! Server-sent event decoding for the traffic log.
//!
//! Streams look like:
//! ```text
//! data: {"choices":[{"delta":{"content":"Hello"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Decoding is display-only. Nothing here touches the bytes relayed to the
//! client, so malformed input degrades to opaque text instead of failing.

use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// A displayable fragment extracted from one `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental content text.
    Content(String),
    /// Role announcement, usually the first chunk of a completion.
    Role(String),
    /// The `[DONE]` terminator.
    Done,
    /// Payload that is not JSON.
    Text(String),
}

/// Incremental decoder for one response stream.
///
/// Keeps the unterminated tail of each chunk so a `data:` line split across
/// network reads is decoded once, whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk, returning events for every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            decode_line(&line, &mut events);
        }
        events
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            decode_line(&rest, &mut events);
        }
        events
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode a single chunk on its own, assuming it holds whole lines.
pub fn decode_chunk(chunk: &[u8]) -> Vec<StreamEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(chunk);
    events.extend(decoder.finish());
    events
}

fn decode_line(raw: &[u8], events: &mut Vec<StreamEvent>) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(&['\n', '\r'][..]);

    // event:, id:, retry:, comments and blank separators carry nothing to show
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };

    if payload == DONE_MARKER {
        events.push(StreamEvent::Done);
        return;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(json) => extract_deltas(&json, events),
        Err(_) => events.push(StreamEvent::Text(payload.to_string())),
    }
}

fn extract_deltas(json: &Value, events: &mut Vec<StreamEvent>) {
    // chat-completions: {"choices":[{"delta":{"content":"..."}}]}
    if let Some(choices) = json.get("choices").and_then(Value::as_array) {
        for delta in choices.iter().filter_map(|c| c.get("delta")) {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                events.push(StreamEvent::Content(content.to_string()));
            } else if let Some(role) = delta.get("role").and_then(Value::as_str) {
                events.push(StreamEvent::Role(role.to_string()));
            }
        }
        return;
    }

    // messages API: {"type":"content_block_delta","delta":{"text":"..."}}
    if let Some(text) = json
        .get("delta")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
    {
        events.push(StreamEvent::Content(text.to_string()));
    }
}
