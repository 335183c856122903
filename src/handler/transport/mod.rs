// Transports: one per wire protocol the dispatcher can serve

mod get;
mod multipart;
mod options;
mod post;
mod websocket;

pub use get::Get;
pub use multipart::{MultipartForm, DEFAULT_MAX_UPLOAD_SIZE};
pub use options::Options;
pub use post::Post;
pub use websocket::{Websocket, DEFAULT_KEEP_ALIVE_PING_INTERVAL};

use std::time::Instant;

use async_graphql::{Executor, ServerError};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

/// A protocol handler the dispatcher can delegate to
///
/// `supports` must be cheap and side-effect free: the dispatcher calls it on
/// every registered transport, in order, until one accepts. `serve` then
/// owns the whole response.
#[async_trait]
pub trait Transport<E: Executor>: Send + Sync {
    fn supports(&self, request: &Request<Body>) -> bool;

    async fn serve(&self, request: Request<Body>, executor: E) -> Response;
}

/// Start of an operation, recorded before a transport is chosen
///
/// Stored in the HTTP request extensions and forwarded to resolvers as
/// GraphQL context data.
#[derive(Debug, Clone, Copy)]
pub struct OperationTrace {
    pub started_at: DateTime<Utc>,
    pub start: Instant,
}

impl OperationTrace {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }
}

/// Headers of the inbound HTTP request, available to resolvers
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders(pub HeaderMap);

/// Boundary error envelope: `{"errors": [...]}` with no `data` key
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ServerError>,
}

pub fn send_error(status: StatusCode, errors: Vec<ServerError>) -> Response {
    write_json(status, &ErrorResponse { errors })
}

pub fn send_errorf(status: StatusCode, message: impl Into<String>) -> Response {
    send_error(status, vec![ServerError::new(message, None)])
}

pub(crate) fn write_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, [(CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(e) => {
            error!("Failed to serialize GraphQL response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Attach the trace and headers recorded on the HTTP request to a GraphQL request
pub(crate) fn with_request_context(
    mut request: async_graphql::Request,
    trace: Option<OperationTrace>,
    headers: &HeaderMap,
) -> async_graphql::Request {
    if let Some(trace) = trace {
        request = request.data(trace);
    }
    request.data(RequestHeaders(headers.clone()))
}

pub(crate) fn with_batch_context(
    batch: async_graphql::BatchRequest,
    trace: Option<OperationTrace>,
    headers: &HeaderMap,
) -> async_graphql::BatchRequest {
    use async_graphql::BatchRequest;

    match batch {
        BatchRequest::Single(request) => {
            BatchRequest::Single(with_request_context(request, trace, headers))
        }
        BatchRequest::Batch(requests) => BatchRequest::Batch(
            requests
                .into_iter()
                .map(|request| with_request_context(request, trace, headers))
                .collect(),
        ),
    }
}

/// Media type of a request, lowercased and without parameters
pub(crate) fn media_type(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
}

pub(crate) fn is_websocket_upgrade(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(axum::http::header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
