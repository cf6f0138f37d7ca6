//! Request handling and transformation.
//!
//! # Responsibilities
//! - Assign each exchange a correlation id
//! - Prepare the inbound request for forwarding to the upstream
//!
//! # Design Decisions
//! - Ids come from a counter owned by the server, not a global
//! - The inbound body is forwarded byte-for-byte
//! - Only `host` and `accept-encoding` change; `content-length` is kept
//!   since the body goes out unchanged, including a declared zero length

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method};

/// Hop-by-hop headers of the inbound connection. The buffered body is sent
/// with a plain length, so chunking and connection options do not carry over.
const HOP_BY_HOP_HEADERS: [&str; 3] = ["transfer-encoding", "connection", "keep-alive"];

/// Correlates the log records of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out strictly increasing request ids.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id. The first id is 1.
    pub fn next_id(&self) -> RequestId {
        // fetch_add is a single atomic RMW, so concurrent callers never share a value
        RequestId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path and query exactly as received.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Derive the upstream request from a fully buffered inbound one.
    pub fn from_inbound(
        method: Method,
        path_and_query: &str,
        inbound_headers: &HeaderMap,
        body: Bytes,
        upstream_host: &HeaderValue,
    ) -> Self {
        let mut headers = inbound_headers.clone();
        // an uncompressed response is what keeps the body readable in the log
        headers.remove(header::ACCEPT_ENCODING);
        for name in HOP_BY_HOP_HEADERS {
            headers.remove(name);
        }
        headers.insert(header::HOST, upstream_host.clone());

        Self {
            method,
            path_and_query: path_and_query.to_string(),
            headers,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn first_id_is_one() {
        let ids = RequestIdGenerator::new();
        assert_eq!(ids.next_id().as_u64(), 1);
        assert_eq!(ids.next_id().as_u64(), 2);
    }

    #[test]
    fn concurrent_ids_are_unique_and_increasing_per_thread() {
        let ids = Arc::new(RequestIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let taken = handle.join().unwrap();
            assert!(taken.windows(2).all(|w| w[0] < w[1]));
            for id in taken {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn outbound_rewrites_host_and_drops_accept_encoding() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:3003"));
        inbound.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        inbound.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2"));
        inbound.insert("x-api-key", HeaderValue::from_static("secret"));

        let outbound = OutboundRequest::from_inbound(
            Method::POST,
            "/v1/messages?beta=true",
            &inbound,
            Bytes::from_static(b"{}"),
            &HeaderValue::from_static("api.example.com"),
        );

        assert_eq!(outbound.headers[header::HOST], "api.example.com");
        assert!(outbound.headers.get(header::ACCEPT_ENCODING).is_none());
        assert_eq!(outbound.headers[header::CONTENT_LENGTH], "2");
        assert_eq!(outbound.headers["x-api-key"], "secret");
        assert_eq!(outbound.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(outbound.path_and_query, "/v1/messages?beta=true");
        assert_eq!(&outbound.body[..], b"{}");
    }

    #[test]
    fn declared_zero_length_is_kept_and_chunking_dropped() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        inbound.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        let outbound = OutboundRequest::from_inbound(
            Method::POST,
            "/e",
            &inbound,
            Bytes::new(),
            &HeaderValue::from_static("h"),
        );
        assert_eq!(outbound.headers[header::CONTENT_LENGTH], "0");
        assert!(outbound.headers.get(header::TRANSFER_ENCODING).is_none());
        assert!(outbound.headers.get(header::CONNECTION).is_none());
    }

    #[test]
    fn repeated_headers_survive() {
        let mut inbound = HeaderMap::new();
        inbound.append("x-tag", HeaderValue::from_static("a"));
        inbound.append("x-tag", HeaderValue::from_static("b"));

        let outbound = OutboundRequest::from_inbound(
            Method::GET,
            "/",
            &inbound,
            Bytes::new(),
            &HeaderValue::from_static("h"),
        );
        let values: Vec<_> = outbound.headers.get_all("x-tag").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }
}
