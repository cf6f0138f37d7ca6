//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! relay task
//!     → sse.rs (decode streamed chunks into displayable events)
//!     → traffic.rs (format + redact, hand records to a LogSink)
//!     → TracingSink → logging.rs subscriber → stdout
//! ```
//!
//! # Design Decisions
//! - Request ID tags every traffic record
//! - Logging never touches the relayed bytes

pub mod logging;
pub mod sse;
pub mod traffic;

pub use sse::{decode_chunk, SseDecoder, StreamEvent};
pub use traffic::{
    LogOptions, LogRecord, LogSink, MemorySink, RecordKind, Severity, TracingSink, TrafficLogger,
};
