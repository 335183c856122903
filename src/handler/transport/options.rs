use async_graphql::Executor;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header::ALLOW, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};

use super::Transport;

/// Answers `OPTIONS` preflights and refuses `HEAD`
#[derive(Debug, Clone, Copy, Default)]
pub struct Options;

#[async_trait]
impl<E: Executor> Transport<E> for Options {
    fn supports(&self, request: &Request<Body>) -> bool {
        request.method() == Method::OPTIONS || request.method() == Method::HEAD
    }

    async fn serve(&self, request: Request<Body>, _executor: E) -> Response {
        if request.method() == Method::OPTIONS {
            (StatusCode::OK, [(ALLOW, "OPTIONS, GET, POST")]).into_response()
        } else {
            StatusCode::METHOD_NOT_ALLOWED.into_response()
        }
    }
}
