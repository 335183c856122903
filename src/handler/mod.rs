// Dispatch server: transport selection, panic recovery and executor configuration

//! # Dispatch Server
//!
//! Configuration and serving are two different types:
//!
//! ```text
//! Server<Q, M, S>          configure: transports, extensions, caches, presenters
//!        ↓ handler()
//! Handler<Schema<Q, M, S>> serve: immutable, cheap to clone, one per connection
//! ```
//!
//! `Server::handler` consumes the server, so nothing can be reconfigured
//! once requests are flowing.
//!
//! For every request the handler:
//! 1. runs the rest of the steps inside a panic boundary,
//! 2. records an [`OperationTrace`],
//! 3. asks each transport, in registration order, whether it supports the request,
//! 4. answers 400 `transport not supported` when none does,
//! 5. otherwise lets the first matching transport write the whole response.
//!
//! A panic anywhere in 2-5 becomes a 422 carrying the single error produced
//! by the recover function and the error presenter.

pub mod executor;
pub mod extension;
pub mod lru;
pub mod transport;

use std::any::Any;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_graphql::{
    parser::types::ExecutableDocument, ObjectType, Schema, SchemaBuilder, ServerError,
    SubscriptionType,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use futures::future::{BoxFuture, FutureExt};
use tower::Service;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::Result;
use executor::{Executor, PanicRecovery};
use extension::{
    AutomaticPersistedQuery, FieldFunc, HandlerExtension, Introspection, OperationFunc,
    ResponseFunc,
};
use self::lru::{Cache, Lru};
use transport::{
    send_error, send_errorf, Get, MultipartForm, OperationTrace, Options, Post, Transport,
    Websocket, DEFAULT_KEEP_ALIVE_PING_INTERVAL, DEFAULT_MAX_UPLOAD_SIZE,
};

/// Parsed-query cache size of the default server
pub const DEFAULT_QUERY_CACHE_SIZE: usize = 1000;

/// Persisted-query cache size of the default server
pub const DEFAULT_PERSISTED_QUERY_CACHE_SIZE: usize = 100;

/// Knobs for [`Server::new_default_with`]
#[derive(Debug, Clone)]
pub struct DefaultSettings {
    pub keep_alive_ping_interval: Duration,
    pub query_cache_size: usize,
    pub persisted_query_cache_size: usize,
    pub max_upload_size: usize,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            keep_alive_ping_interval: DEFAULT_KEEP_ALIVE_PING_INTERVAL,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
            persisted_query_cache_size: DEFAULT_PERSISTED_QUERY_CACHE_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

/// Transports plus executor settings, before serving starts
pub struct Server<Q, M, S> {
    transports: Vec<Arc<dyn Transport<Schema<Q, M, S>>>>,
    exec: Executor<Q, M, S>,
}

impl<Q, M, S> Server<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    /// A server with no transports, no caches and introspection disabled
    pub fn new(schema: SchemaBuilder<Q, M, S>) -> Self {
        Self {
            transports: Vec::new(),
            exec: Executor::new(schema),
        }
    }

    /// Websocket, OPTIONS, GET, POST and multipart transports, a 1000 entry
    /// query cache, introspection and automatic persisted queries
    pub fn new_default(schema: SchemaBuilder<Q, M, S>) -> Self {
        Self::new_default_with(schema, &DefaultSettings::default())
    }

    pub fn new_default_with(schema: SchemaBuilder<Q, M, S>, settings: &DefaultSettings) -> Self {
        let mut srv = Self::new(schema);

        srv.add_transport(Websocket {
            keep_alive_ping_interval: settings.keep_alive_ping_interval,
        });
        srv.add_transport(Options);
        srv.add_transport(Get);
        srv.add_transport(Post);
        srv.add_transport(MultipartForm {
            max_upload_size: settings.max_upload_size,
            ..MultipartForm::default()
        });

        srv.set_query_cache(Arc::new(Lru::new(settings.query_cache_size)));

        srv.exec.install(&Introspection);
        srv.exec.install(&AutomaticPersistedQuery::new(Arc::new(Lru::new(
            settings.persisted_query_cache_size,
        ))));

        srv
    }

    /// Register a transport
    ///
    /// Transports are tried in registration order and the first one whose
    /// `supports` returns true serves the request, so order is part of the
    /// configuration.
    pub fn add_transport<T>(&mut self, transport: T)
    where
        T: Transport<Schema<Q, M, S>> + 'static,
    {
        self.transports.push(Arc::new(transport));
    }

    pub fn set_error_presenter<F>(&mut self, presenter: F)
    where
        F: Fn(ServerError) -> ServerError + Send + Sync + 'static,
    {
        self.exec.set_error_presenter(Arc::new(presenter));
    }

    pub fn set_recover_func<F>(&mut self, recover: F)
    where
        F: Fn(&(dyn Any + Send)) -> ServerError + Send + Sync + 'static,
    {
        self.exec.set_recover_func(Arc::new(recover));
    }

    pub fn set_query_cache(&mut self, cache: Arc<dyn Cache<ExecutableDocument>>) {
        self.exec.set_query_cache(cache);
    }

    pub fn use_extension(&mut self, extension: impl HandlerExtension) -> Result<()> {
        self.exec.use_extension(extension)
    }

    /// Register middleware that only wraps field resolution
    pub fn around_fields(&mut self, f: FieldFunc) -> Result<()> {
        self.exec.around_fields(f)
    }

    /// Register middleware that only wraps whole operations
    pub fn around_operations(&mut self, f: OperationFunc) -> Result<()> {
        self.exec.around_operations(f)
    }

    /// Register middleware that only wraps response execution
    pub fn around_responses(&mut self, f: ResponseFunc) -> Result<()> {
        self.exec.around_responses(f)
    }

    /// Names of the installed extensions, in registration order
    pub fn extension_names(&self) -> &[&'static str] {
        self.exec.extensions().names()
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    /// Freeze the configuration and build the request handler
    pub fn handler(self) -> Handler<Schema<Q, M, S>> {
        let (schema, recovery) = self.exec.finish();
        Handler {
            transports: self.transports.into(),
            executor: schema,
            recovery,
        }
    }

    /// Mount the handler on `path` for every method
    pub fn into_router(self, path: &str) -> Router {
        Router::new().route_service(path, self.handler())
    }
}

/// Serves requests with a frozen set of transports and one shared executor
pub struct Handler<E> {
    transports: Arc<[Arc<dyn Transport<E>>]>,
    executor: E,
    recovery: PanicRecovery,
}

impl<E: Clone> Clone for Handler<E> {
    fn clone(&self) -> Self {
        Self {
            transports: self.transports.clone(),
            executor: self.executor.clone(),
            recovery: self.recovery.clone(),
        }
    }
}

impl<E: async_graphql::Executor> Handler<E> {
    /// Handle one inbound request; never panics and always produces a response
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let span = info_span!(
            "graphql_request",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            uri = %request.uri(),
        );

        let outcome = AssertUnwindSafe(self.dispatch(request))
            .catch_unwind()
            .instrument(span)
            .await;

        match outcome {
            Ok(response) => response,
            Err(payload) => {
                let error = self.recovery.present_recovered_error(payload.as_ref());
                send_error(StatusCode::UNPROCESSABLE_ENTITY, vec![error])
            }
        }
    }

    async fn dispatch(&self, mut request: Request<Body>) -> Response {
        request.extensions_mut().insert(OperationTrace::start());

        let transport = match self.transport_for(&request) {
            Some(transport) => transport,
            None => {
                warn!(
                    "No transport supports {} {}",
                    request.method(),
                    request.uri()
                );
                return send_errorf(StatusCode::BAD_REQUEST, "transport not supported");
            }
        };

        transport.serve(request, self.executor.clone()).await
    }

    fn transport_for(&self, request: &Request<Body>) -> Option<Arc<dyn Transport<E>>> {
        let index = self
            .transports
            .iter()
            .position(|transport| transport.supports(request))?;
        debug!("Dispatching to transport #{}", index);
        Some(self.transports[index].clone())
    }
}

impl<E: async_graphql::Executor> Service<Request<Body>> for Handler<E> {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let handler = self.clone();
        async move { Ok(handler.handle(request).await) }.boxed()
    }
}

#[cfg(test)]
mod tests;
