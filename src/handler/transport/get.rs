use async_graphql::{
    http::parse_query_string,
    parser::{
        parse_query,
        types::{DocumentOperations, OperationType},
    },
    Executor,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
};
use tracing::debug;

use super::{
    is_websocket_upgrade, send_errorf, with_request_context, write_json, OperationTrace, Transport,
};

/// GraphQL over `GET`, parameters in the query string
///
/// `query`, `operationName`, and JSON encoded `variables` and `extensions`.
/// Only query operations are allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Get;

#[async_trait]
impl<E: Executor> Transport<E> for Get {
    fn supports(&self, request: &Request<Body>) -> bool {
        request.method() == Method::GET && !is_websocket_upgrade(request)
    }

    async fn serve(&self, request: Request<Body>, executor: E) -> Response {
        let (parts, _body) = request.into_parts();
        let trace = parts.extensions.get::<OperationTrace>().copied();

        let gql_request = match parse_query_string(parts.uri.query().unwrap_or_default()) {
            Ok(gql_request) => gql_request,
            Err(e) => {
                debug!("Rejecting GET request: {}", e);
                return send_errorf(StatusCode::BAD_REQUEST, e.to_string());
            }
        };

        if selects_mutation(&gql_request.query, gql_request.operation_name.as_deref()) {
            return send_errorf(
                StatusCode::NOT_ACCEPTABLE,
                "GET requests only allow query operations",
            );
        }

        let gql_request = with_request_context(gql_request, trace, &parts.headers);
        let response = executor.execute(gql_request).await;
        write_json(StatusCode::OK, &response)
    }
}

/// Whether the operation that would run is a mutation
///
/// Documents that do not parse, or where the operation cannot be picked, are
/// left for the engine to reject.
fn selects_mutation(query: &str, operation_name: Option<&str>) -> bool {
    let document = match parse_query(query) {
        Ok(document) => document,
        Err(_) => return false,
    };

    let operation_type = match (&document.operations, operation_name) {
        (DocumentOperations::Single(operation), _) => Some(operation.node.ty),
        (DocumentOperations::Multiple(operations), Some(name)) => {
            operations.get(name).map(|operation| operation.node.ty)
        }
        (DocumentOperations::Multiple(_), None) => None,
    };

    operation_type == Some(OperationType::Mutation)
}
