//! Client side of the relay: the single fixed upstream.

use std::time::Duration;

use axum::http::HeaderValue;
use url::Url;

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::http::request::OutboundRequest;

/// Failure talking to the upstream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("upstream sent no response headers within {0:?}")]
    ResponseTimeout(Duration),

    #[error("upstream body stalled for {0:?}")]
    IdleTimeout(Duration),
}

/// Problems turning configuration into a usable upstream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamSetupError {
    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// The fixed target every request is relayed to.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    /// `scheme://host[:port]` without a trailing slash.
    origin: String,
    host: HeaderValue,
    response_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl Upstream {
    pub fn from_config(
        upstream: &UpstreamConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, UpstreamSetupError> {
        let invalid = |reason: &str| UpstreamSetupError::InvalidUrl {
            url: upstream.url.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(&upstream.url).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&authority).map_err(|e| invalid(&e.to_string()))?;

        // one connection per exchange; nothing is kept idle between requests
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(0);
        if let Some(connect) = timeouts.connect() {
            builder = builder.connect_timeout(connect);
        }

        Ok(Self {
            client: builder.build()?,
            origin: url.origin().ascii_serialization(),
            host,
            response_timeout: timeouts.response(),
            idle_timeout: timeouts.idle(),
        })
    }

    /// Value written into the outbound `host` header.
    pub fn host(&self) -> &HeaderValue {
        &self.host
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Send a request and wait for the response headers.
    pub async fn send(&self, request: OutboundRequest) -> Result<reqwest::Response, UpstreamError> {
        let url = format!("{}{}", self.origin, request.path_and_query);

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let pending = builder.send();
        let response = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| UpstreamError::ResponseTimeout(limit))??,
            None => pending.await?,
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(url: &str) -> Result<Upstream, UpstreamSetupError> {
        let config = UpstreamConfig { url: url.to_string() };
        Upstream::from_config(&config, &TimeoutConfig::default())
    }

    #[test]
    fn host_omits_default_port() {
        let upstream = upstream("https://api.example.com").unwrap();
        assert_eq!(upstream.host(), "api.example.com");
        assert_eq!(upstream.origin(), "https://api.example.com");
    }

    #[test]
    fn host_keeps_explicit_port() {
        let upstream = upstream("http://127.0.0.1:9000/").unwrap();
        assert_eq!(upstream.host(), "127.0.0.1:9000");
        assert_eq!(upstream.origin(), "http://127.0.0.1:9000");
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(matches!(upstream("::nope"), Err(UpstreamSetupError::InvalidUrl { .. })));
    }

    #[test]
    fn idle_timeout_follows_config() {
        let config = UpstreamConfig::default();
        let timeouts = TimeoutConfig {
            idle_secs: 0,
            ..TimeoutConfig::default()
        };
        let upstream = Upstream::from_config(&config, &timeouts).unwrap();
        assert_eq!(upstream.idle_timeout(), None);
    }
}
