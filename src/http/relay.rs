//! The relay handler: one inbound request, one upstream exchange.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::request::OutboundRequest;
use crate::http::response::{
    carries_body, error_response, InspectedBody, ResponseInspector, ResponseMode,
};
use crate::http::server::AppState;

/// Forward any request to the upstream and relay its answer.
pub async fn relay(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // the client connection is likely gone; this reply may never be delivered
            state.traffic.inbound_error(&parts.method, &path, &e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let id = state.ids.next_id();
    let head_request = parts.method == Method::HEAD;
    state
        .traffic
        .request(id, &parts.method, &path, &parts.headers, &body);

    let outbound = OutboundRequest::from_inbound(
        parts.method,
        &path,
        &parts.headers,
        body,
        state.upstream.host(),
    );

    let upstream = match state.upstream.send(outbound).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(request_id = %id, error = %e, "Upstream request failed");
            state.traffic.error(id, &e);
            return error_response(&e);
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();
    let mode = ResponseMode::from_headers(&headers);
    state.traffic.response_start(id, status);
    tracing::debug!(request_id = %id, status = %status, mode = ?mode, "Relaying upstream response");

    let inspector = ResponseInspector::new(id, state.traffic.clone(), mode, &headers);
    let body = if carries_body(head_request, status) {
        let body = InspectedBody::new(
            Box::pin(upstream.bytes_stream()),
            inspector,
            state.upstream.idle_timeout(),
        );
        Body::from_stream(body)
    } else {
        // nothing follows the headers, and the server would never poll a body here
        inspector.finish();
        Body::empty()
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
