use async_graphql::{BatchRequest, Executor};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
};
use tracing::{debug, warn};

use super::{media_type, send_errorf, with_batch_context, write_json, OperationTrace, Transport};

/// GraphQL over `POST` with an `application/json` body
///
/// Accepts a single request object or an array of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Post;

#[async_trait]
impl<E: Executor> Transport<E> for Post {
    fn supports(&self, request: &Request<Body>) -> bool {
        request.method() == Method::POST
            && media_type(request).as_deref() == Some("application/json")
    }

    async fn serve(&self, request: Request<Body>, executor: E) -> Response {
        let (parts, body) = request.into_parts();
        let trace = parts.extensions.get::<OperationTrace>().copied();

        let bytes = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read POST body: {}", e);
                return send_errorf(StatusCode::BAD_REQUEST, format!("could not read body: {}", e));
            }
        };

        let batch: BatchRequest = match serde_json::from_slice(&bytes) {
            Ok(batch) => batch,
            Err(e) => {
                debug!("Rejecting POST body: {}", e);
                return send_errorf(
                    StatusCode::BAD_REQUEST,
                    format!("json request body could not be decoded: {}", e),
                );
            }
        };

        let batch = with_batch_context(batch, trace, &parts.headers);
        let response = executor.execute_batch(batch).await;
        write_json(StatusCode::OK, &response)
    }
}
