//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all relay handler
//! - Wire up middleware (tracing)
//! - Serve a bound listener until shutdown
//! - Own the per-process request id counter

use std::sync::Arc;

use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::relay::relay;
use crate::http::request::RequestIdGenerator;
use crate::http::upstream::{Upstream, UpstreamSetupError};
use crate::lifecycle::signals;
use crate::observability::traffic::{LogOptions, LogSink, TracingSink, TrafficLogger};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<Upstream>,
    pub ids: Arc<RequestIdGenerator>,
    pub traffic: TrafficLogger,
}

/// HTTP server for the inspecting proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server that writes the traffic log through `tracing`.
    pub fn new(config: ProxyConfig) -> Result<Self, UpstreamSetupError> {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a server with a custom traffic log sink.
    pub fn with_sink(
        config: ProxyConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, UpstreamSetupError> {
        let upstream = Upstream::from_config(&config.upstream, &config.timeouts)?;

        let state = AppState {
            upstream: Arc::new(upstream),
            ids: Arc::new(RequestIdGenerator::new()),
            traffic: TrafficLogger::new(LogOptions::from(&config.logging), sink),
        };

        let router = Self::build_router(state);
        Ok(Self { router, config })
    }

    /// Build the Axum router; every method and path goes to the relay.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(relay))
            .route("/", any(relay))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Stops accepting on SIGTERM/Ctrl+C or when `shutdown` fires, then waits
    /// for in-flight exchanges to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signals::terminate() => {}
                    _ = shutdown.recv() => {
                        tracing::info!("Shutdown requested");
                    }
                }
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
