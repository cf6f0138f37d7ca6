//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route)
//!     → relay.rs (buffer body, assign request id)
//!     → request.rs (derive the outbound request)
//!     → upstream.rs (send to the fixed upstream)
//!     → response.rs (relay + inspect the body, or 502 on failure)
//!     → Send to client
//! ```

pub mod relay;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use request::{OutboundRequest, RequestId, RequestIdGenerator};
pub use response::{ResponseMode, PROXY_ERROR};
pub use server::HttpServer;
pub use upstream::{Upstream, UpstreamError, UpstreamSetupError};
