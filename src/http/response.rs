//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the upstream body to the client chunk by chunk, untouched
//! - Tee each chunk into the traffic log (buffered dump or SSE decoding)
//! - Map upstream failures to the fixed 502 error reply
//!
//! # Design Decisions
//! - Buffered vs streaming is decided once, from `content-type`
//! - The client body owns the upstream stream; dropping one drops the other
//! - Completion is detected at end-of-stream or when `content-length` bytes
//!   have been relayed, whichever the server observes first

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use serde_json::json;
use tokio::time::Sleep;

use crate::http::request::RequestId;
use crate::http::upstream::UpstreamError;
use crate::observability::sse::{SseDecoder, StreamEvent};
use crate::observability::traffic::{error_chain, StreamSummary, TrafficLogger};

const EVENT_STREAM: &str = "text/event-stream";

/// Label of the error reply sent when the upstream cannot be reached.
pub const PROXY_ERROR: &str = "Proxy error";

/// How an upstream body is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Accumulate and log the whole body at the end.
    Buffered,
    /// Decode server-sent events as they arrive.
    Streaming,
}

impl ResponseMode {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let is_event_stream = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains(EVENT_STREAM));

        if is_event_stream {
            Self::Streaming
        } else {
            Self::Buffered
        }
    }
}

/// Whether a response to this exchange has a body to relay.
///
/// Replies to `HEAD`, informational replies, `204` and `304` end at the headers.
pub fn carries_body(head_request: bool, status: StatusCode) -> bool {
    !(head_request
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// The 502 reply for an upstream that failed before answering.
pub fn error_response(error: &UpstreamError) -> Response {
    let body = json!({
        "error": PROXY_ERROR,
        "message": error_chain(error),
    });
    (StatusCode::BAD_GATEWAY, Json(body)).into_response()
}

enum Capture {
    Buffered { body: Vec<u8> },
    Streaming { decoder: SseDecoder, transcript: String },
}

/// Logging state for one upstream response body.
pub struct ResponseInspector {
    id: RequestId,
    logger: TrafficLogger,
    capture: Capture,
    expected_len: Option<u64>,
    chunks: usize,
    bytes: usize,
    started: Instant,
}

impl ResponseInspector {
    pub fn new(
        id: RequestId,
        logger: TrafficLogger,
        mode: ResponseMode,
        headers: &HeaderMap,
    ) -> Self {
        let capture = match mode {
            ResponseMode::Buffered => Capture::Buffered { body: Vec::new() },
            ResponseMode::Streaming => Capture::Streaming {
                decoder: SseDecoder::new(),
                transcript: String::new(),
            },
        };
        let expected_len = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Self {
            id,
            logger,
            capture,
            expected_len,
            chunks: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    /// Record a chunk that is being relayed.
    pub fn observe(&mut self, chunk: &[u8]) {
        self.chunks += 1;
        self.bytes += chunk.len();

        match &mut self.capture {
            Capture::Buffered { body } => body.extend_from_slice(chunk),
            Capture::Streaming { decoder, transcript } => {
                for event in decoder.feed(chunk) {
                    if let StreamEvent::Content(text) = &event {
                        transcript.push_str(text);
                    }
                    self.logger.stream_event(self.id, &event);
                }
            }
        }
    }

    /// Whether the declared body length has been fully relayed.
    pub fn reached_declared_length(&self) -> bool {
        self.expected_len == Some(self.bytes as u64)
    }

    /// Emit the closing records once the body has ended.
    pub fn finish(self) {
        let Self {
            id,
            logger,
            capture,
            chunks,
            bytes,
            started,
            ..
        } = self;

        match capture {
            Capture::Buffered { body } => logger.response_body(id, &body),
            Capture::Streaming {
                mut decoder,
                mut transcript,
            } => {
                for event in decoder.finish() {
                    if let StreamEvent::Content(text) = &event {
                        transcript.push_str(text);
                    }
                    logger.stream_event(id, &event);
                }
                let summary = StreamSummary {
                    chunks,
                    bytes,
                    elapsed: started.elapsed(),
                    transcript,
                };
                logger.stream_end(id, &summary);
            }
        }
    }

    pub fn fail(self, error: &UpstreamError) {
        self.logger.error(self.id, error);
    }

    pub fn abandon(self) {
        self.logger.abandoned(self.id, self.bytes);
    }
}

/// Upstream body stream that logs what it relays.
///
/// Yields every upstream chunk unchanged and in order.
pub struct InspectedBody<S> {
    upstream: S,
    inspector: Option<ResponseInspector>,
    idle: Option<IdleTimer>,
}

struct IdleTimer {
    limit: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl IdleTimer {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            sleep: Box::pin(tokio::time::sleep(limit)),
        }
    }

    fn reset(&mut self) {
        let deadline = tokio::time::Instant::now() + self.limit;
        self.sleep.as_mut().reset(deadline);
    }
}

impl<S> InspectedBody<S> {
    pub fn new(upstream: S, inspector: ResponseInspector, idle_timeout: Option<Duration>) -> Self {
        Self {
            upstream,
            inspector: Some(inspector),
            idle: idle_timeout.map(IdleTimer::new),
        }
    }

    fn fail(&mut self, error: UpstreamError) -> Poll<Option<Result<Bytes, UpstreamError>>> {
        if let Some(inspector) = self.inspector.take() {
            inspector.fail(&error);
        }
        Poll::Ready(Some(Err(error)))
    }
}

impl<S, E> Stream for InspectedBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<UpstreamError>,
{
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if this.inspector.is_none() {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.upstream).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(idle) = this.idle.as_mut() {
                    idle.reset();
                }
                if let Some(inspector) = this.inspector.as_mut() {
                    inspector.observe(&chunk);
                    if inspector.reached_declared_length() {
                        if let Some(inspector) = this.inspector.take() {
                            inspector.finish();
                        }
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => this.fail(e.into()),
            Poll::Ready(None) => {
                if let Some(inspector) = this.inspector.take() {
                    inspector.finish();
                }
                Poll::Ready(None)
            }
            Poll::Pending => {
                let stalled = match this.idle.as_mut() {
                    Some(idle) => idle.sleep.as_mut().poll(cx).is_ready().then_some(idle.limit),
                    None => None,
                };
                match stalled {
                    Some(limit) => this.fail(UpstreamError::IdleTimeout(limit)),
                    None => Poll::Pending,
                }
            }
        }
    }
}

impl<S> Drop for InspectedBody<S> {
    fn drop(&mut self) {
        if let Some(inspector) = self.inspector.take() {
            inspector.abandon();
        }
    }
}
