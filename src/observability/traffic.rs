//! Human-readable traffic log.
//!
//! # Responsibilities
//! - Format request, response, stream and error records for one exchange
//! - Redact credentials before they reach the log
//! - Hand finished records to a pluggable [`LogSink`]
//!
//! # Design Decisions
//! - Formatting is pure: the same input always renders the same text
//! - Sinks only see finished records, so tests can swap in [`MemorySink`]
//! - Nothing here can fail the relay; unparseable bodies are shown raw

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use serde_json::Value;

use crate::config::LoggingConfig;
use crate::http::request::RequestId;
use crate::observability::sse::StreamEvent;

const AUTHORIZATION_VISIBLE: usize = 20;
const API_KEY_VISIBLE: usize = 10;
const ELLIPSIS: &str = "...";

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Request,
    ResponseStart,
    ResponseBody,
    StreamEvent,
    StreamEnd,
    Error,
}

/// How loudly a record should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A fully formatted traffic log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// `None` only for failures that happen before an id is assigned.
    pub request_id: Option<RequestId>,
    pub kind: RecordKind,
    pub severity: Severity,
    pub text: String,
}

/// Destination for traffic log records.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: LogRecord);
}

/// Writes records through `tracing` under the `traffic` target.
///
/// The subscriber's colored level column is what sets failing statuses and
/// errors apart on the console.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        let id = record
            .request_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        match record.severity {
            Severity::Info => {
                tracing::info!(target: "traffic", request_id = %id, "{}", record.text)
            }
            Severity::Warning => {
                tracing::warn!(target: "traffic", request_id = %id, "{}", record.text)
            }
            Severity::Error => {
                tracing::error!(target: "traffic", request_id = %id, "{}", record.text)
            }
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Records belonging to one exchange.
    pub fn for_request(&self, id: RequestId) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.request_id == Some(id))
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Formatting switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub include_headers: bool,
    pub pretty_json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            include_headers: true,
            pretty_json: true,
        }
    }
}

impl From<&LoggingConfig> for LogOptions {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            include_headers: config.include_headers,
            pretty_json: config.pretty_json,
        }
    }
}

/// Totals reported when a streamed response ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub chunks: usize,
    pub bytes: usize,
    pub elapsed: Duration,
    /// Concatenated content fragments.
    pub transcript: String,
}

/// The traffic logger shared by every relay task.
#[derive(Clone)]
pub struct TrafficLogger {
    options: LogOptions,
    sink: Arc<dyn LogSink>,
}

impl TrafficLogger {
    pub fn new(options: LogOptions, sink: Arc<dyn LogSink>) -> Self {
        Self { options, sink }
    }

    pub fn request(
        &self,
        id: RequestId,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) {
        let text = format_request(self.options, method, path, headers, body);
        self.emit(Some(id), RecordKind::Request, Severity::Info, text);
    }

    pub fn response_start(&self, id: RequestId, status: StatusCode) {
        let severity = if status.as_u16() >= 400 {
            Severity::Warning
        } else {
            Severity::Info
        };
        self.emit(Some(id), RecordKind::ResponseStart, severity, format!("<- {status}"));
    }

    pub fn response_body(&self, id: RequestId, body: &[u8]) {
        let rendered = render_body(body, self.options.pretty_json);
        let text = format!("response body:\n{}", indent(&rendered));
        self.emit(Some(id), RecordKind::ResponseBody, Severity::Info, text);
    }

    pub fn stream_event(&self, id: RequestId, event: &StreamEvent) {
        let text = match event {
            StreamEvent::Content(content) => format!("stream: {content}"),
            StreamEvent::Role(role) => format!("stream role: {role}"),
            StreamEvent::Done => "stream: [DONE]".to_string(),
            StreamEvent::Text(text) => format!("stream data: {text}"),
        };
        self.emit(Some(id), RecordKind::StreamEvent, Severity::Info, text);
    }

    pub fn stream_end(&self, id: RequestId, summary: &StreamSummary) {
        let mut text = format!(
            "stream ended: {} chunks, {} bytes in {:.2?}",
            summary.chunks, summary.bytes, summary.elapsed
        );
        if !summary.transcript.is_empty() {
            let _ = write!(text, "\ncontent:\n{}", indent(&summary.transcript));
        }
        self.emit(Some(id), RecordKind::StreamEnd, Severity::Info, text);
    }

    /// The client went away before the upstream response finished.
    pub fn abandoned(&self, id: RequestId, relayed_bytes: usize) {
        let text =
            format!("client disconnected after {relayed_bytes} bytes; upstream transfer dropped");
        self.emit(Some(id), RecordKind::Error, Severity::Warning, text);
    }

    pub fn error(&self, id: RequestId, error: &(dyn StdError + 'static)) {
        let text = format!("proxy error: {}", error_chain(error));
        self.emit(Some(id), RecordKind::Error, Severity::Error, text);
    }

    /// Failure reading a request that never got an id.
    pub fn inbound_error(&self, method: &Method, path: &str, error: &(dyn StdError + 'static)) {
        let text = format!("failed to read {method} {path}: {}", error_chain(error));
        self.emit(None, RecordKind::Error, Severity::Error, text);
    }

    fn emit(
        &self,
        request_id: Option<RequestId>,
        kind: RecordKind,
        severity: Severity,
        text: String,
    ) {
        self.sink.emit(LogRecord {
            request_id,
            kind,
            severity,
            text,
        });
    }
}

/// Render a request record.
pub fn format_request(
    options: LogOptions,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> String {
    let mut out = format!("-> {method} {path}");

    if options.include_headers && !headers.is_empty() {
        out.push_str("\nheaders:");
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            let _ = write!(out, "\n  {}: {}", name, redact_header(name.as_str(), &value));
        }
    }

    if !body.is_empty() {
        let _ = write!(out, "\nbody:\n{}", indent(&render_body(body, options.pretty_json)));
    }
    out
}

/// Shorten credential headers to a recognizable prefix.
pub fn redact_header<'a>(name: &str, value: &'a str) -> Cow<'a, str> {
    let visible = if name.eq_ignore_ascii_case("authorization") {
        AUTHORIZATION_VISIBLE
    } else if name.eq_ignore_ascii_case("x-api-key") {
        API_KEY_VISIBLE
    } else {
        return Cow::Borrowed(value);
    };

    match value.char_indices().nth(visible) {
        Some((cut, _)) => Cow::Owned(format!("{}{ELLIPSIS}", &value[..cut])),
        None => Cow::Borrowed(value),
    }
}

/// Show a body as pretty JSON when possible, raw text otherwise.
pub fn render_body(body: &[u8], pretty_json: bool) -> String {
    if body.is_empty() {
        return "(empty)".to_string();
    }
    if pretty_json {
        if let Ok(json) = serde_json::from_slice::<Value>(body) {
            if let Ok(pretty) = serde_json::to_string_pretty(&json) {
                return pretty;
            }
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

/// Join an error with all of its sources.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        // reqwest and hyper often repeat the inner message in the outer one
        if !text.contains(&cause_text) {
            let _ = write!(text, ": {cause_text}");
        }
        source = cause.source();
    }
    text
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
