// Execution extensions: what `Server::use_extension` and the `around_*` helpers install

use std::sync::Arc;

use async_graphql::{
    extensions::{
        Extension, ExtensionContext, ExtensionFactory, NextExecute, NextParseQuery,
        NextPrepareRequest, NextRequest, NextResolve, ResolveInfo,
    },
    parser::types::ExecutableDocument,
    ErrorExtensionValues, Request, Response, ServerError, ServerResult, Value, Variables,
};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::lru::Cache;
use crate::{DispatchError, Result};

/// Rewrites every error before it reaches the client
pub type ErrorPresenter = Arc<dyn Fn(ServerError) -> ServerError + Send + Sync>;

/// Something that can be registered with `Server::use_extension`
///
/// `validate` runs at registration time, before any traffic is served.
/// `install` is only called on extensions that validated.
pub trait HandlerExtension: Send + Sync + 'static {
    fn extension_name(&self) -> &'static str;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn install(&self, registry: &mut ExtensionRegistry);
}

/// Engine-side effects of the registered extensions
#[derive(Default)]
pub struct ExtensionRegistry {
    pub(crate) introspection: bool,
    pub(crate) factories: Vec<Arc<dyn ExtensionFactory>>,
    pub(crate) names: Vec<&'static str>,
}

impl ExtensionRegistry {
    pub fn enable_introspection(&mut self) {
        self.introspection = true;
    }

    /// Add an async-graphql extension; order of registration is execution order
    pub fn add_factory(&mut self, factory: impl ExtensionFactory) {
        self.factories.push(Arc::new(factory));
    }

    pub fn introspection_enabled(&self) -> bool {
        self.introspection
    }

    /// Names of the installed extensions, in registration order
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }
}

/// Lets a shared factory be handed to a schema builder
pub(crate) struct SharedFactory(pub(crate) Arc<dyn ExtensionFactory>);

impl ExtensionFactory for SharedFactory {
    fn create(&self) -> Arc<dyn Extension> {
        self.0.create()
    }
}

/// Allows schema introspection. Without it `__schema` and `__type` are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Introspection;

impl HandlerExtension for Introspection {
    fn extension_name(&self) -> &'static str {
        "Introspection"
    }

    fn install(&self, registry: &mut ExtensionRegistry) {
        registry.enable_introspection();
    }
}

// ============================================================================
// Automatic persisted queries
// ============================================================================

const PERSISTED_QUERY_NOT_FOUND: &str = "PERSISTED_QUERY_NOT_FOUND";

/// Automatic persisted queries
///
/// A client first sends only `extensions.persistedQuery.sha256Hash`; on a
/// miss it retries with the full query, which is stored under its hash.
#[derive(Clone)]
pub struct AutomaticPersistedQuery {
    pub cache: Arc<dyn Cache<String>>,
}

impl AutomaticPersistedQuery {
    pub fn new(cache: Arc<dyn Cache<String>>) -> Self {
        Self { cache }
    }
}

impl HandlerExtension for AutomaticPersistedQuery {
    fn extension_name(&self) -> &'static str {
        "AutomaticPersistedQuery"
    }

    fn install(&self, registry: &mut ExtensionRegistry) {
        registry.add_factory(PersistedQueryFactory {
            cache: self.cache.clone(),
        });
    }
}

#[derive(Debug, Deserialize)]
struct PersistedQuery {
    version: i64,
    #[serde(rename = "sha256Hash")]
    sha256_hash: String,
}

struct PersistedQueryFactory {
    cache: Arc<dyn Cache<String>>,
}

impl ExtensionFactory for PersistedQueryFactory {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(PersistedQueryExtension {
            cache: self.cache.clone(),
        })
    }
}

struct PersistedQueryExtension {
    cache: Arc<dyn Cache<String>>,
}

impl PersistedQueryExtension {
    fn resolve_query(&self, mut request: Request) -> ServerResult<Request> {
        let persisted = match request.extensions.get("persistedQuery") {
            Some(value) => parse_persisted_query(value)?,
            None => return Ok(request),
        };

        if persisted.version != 1 {
            return Err(ServerError::new("unsupported APQ version", None));
        }

        if request.query.is_empty() {
            match self.cache.get(&persisted.sha256_hash) {
                Some(query) => {
                    debug!("APQ hit for {}", persisted.sha256_hash);
                    request.query = query;
                }
                None => return Err(persisted_query_not_found()),
            }
        } else {
            if compute_query_hash(&request.query) != persisted.sha256_hash {
                return Err(ServerError::new(
                    "provided APQ hash does not match query",
                    None,
                ));
            }
            self.cache.add(&persisted.sha256_hash, request.query.clone());
        }

        Ok(request)
    }
}

#[async_trait::async_trait]
impl Extension for PersistedQueryExtension {
    async fn prepare_request(
        &self,
        ctx: &ExtensionContext<'_>,
        request: Request,
        next: NextPrepareRequest<'_>,
    ) -> ServerResult<Request> {
        let request = self.resolve_query(request)?;
        next.run(ctx, request).await
    }
}

fn parse_persisted_query(value: &Value) -> ServerResult<PersistedQuery> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|_| ServerError::new("invalid APQ extension data", None))
}

fn persisted_query_not_found() -> ServerError {
    let mut extensions = ErrorExtensionValues::default();
    extensions.set("code", PERSISTED_QUERY_NOT_FOUND);

    let mut error = ServerError::new("PersistedQueryNotFound", None);
    error.extensions = Some(extensions);
    error
}

/// Lowercase hex SHA-256 of a query, as sent by APQ clients
pub fn compute_query_hash(query: &str) -> String {
    format!("{:x}", Sha256::digest(query.as_bytes()))
}

// ============================================================================
// Inline middleware
// ============================================================================

/// What a field middleware gets to know about the field being resolved
#[derive(Debug, Clone)]
pub struct FieldCall {
    pub path: String,
    pub parent_type: String,
    pub return_type: String,
    pub field_name: String,
}

/// What a response middleware gets to know about the operation
#[derive(Debug, Clone)]
pub struct ResponseCall {
    pub operation_name: Option<String>,
}

pub type FieldMiddleware = dyn for<'a> Fn(
        FieldCall,
        BoxFuture<'a, ServerResult<Option<Value>>>,
    ) -> BoxFuture<'a, ServerResult<Option<Value>>>
    + Send
    + Sync;

pub type OperationMiddleware =
    dyn for<'a> Fn(BoxFuture<'a, Response>) -> BoxFuture<'a, Response> + Send + Sync;

pub type ResponseMiddleware = dyn for<'a> Fn(ResponseCall, BoxFuture<'a, Response>) -> BoxFuture<'a, Response>
    + Send
    + Sync;

/// Field middleware built from a closure
///
/// The closure receives the downstream resolver as a future; awaiting it runs
/// the field, dropping it skips the field. `FieldFunc::default()` is the
/// unset value and fails validation.
#[derive(Clone, Default)]
pub struct FieldFunc(Option<Arc<FieldMiddleware>>);

impl FieldFunc {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(
                FieldCall,
                BoxFuture<'a, ServerResult<Option<Value>>>,
            ) -> BoxFuture<'a, ServerResult<Option<Value>>>
            + Send
            + Sync
            + 'static,
    {
        Self(Some(Arc::new(f)))
    }
}

/// Operation middleware built from a closure, wrapping parse, validation and execution
#[derive(Clone, Default)]
pub struct OperationFunc(Option<Arc<OperationMiddleware>>);

impl OperationFunc {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(BoxFuture<'a, Response>) -> BoxFuture<'a, Response> + Send + Sync + 'static,
    {
        Self(Some(Arc::new(f)))
    }
}

/// Response middleware built from a closure, wrapping execution of the operation
#[derive(Clone, Default)]
pub struct ResponseFunc(Option<Arc<ResponseMiddleware>>);

impl ResponseFunc {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(ResponseCall, BoxFuture<'a, Response>) -> BoxFuture<'a, Response>
            + Send
            + Sync
            + 'static,
    {
        Self(Some(Arc::new(f)))
    }
}

fn nil_function(name: &str, kind: &str) -> DispatchError {
    DispatchError::InvalidExtension {
        name: name.to_string(),
        reason: format!("{} can not be nil", kind),
    }
}

impl HandlerExtension for FieldFunc {
    fn extension_name(&self) -> &'static str {
        "InlineFieldFunc"
    }

    fn validate(&self) -> Result<()> {
        match self.0 {
            Some(_) => Ok(()),
            None => Err(nil_function(self.extension_name(), "FieldFunc")),
        }
    }

    fn install(&self, registry: &mut ExtensionRegistry) {
        if let Some(f) = &self.0 {
            registry.add_factory(Inline(FieldHook(f.clone())));
        }
    }
}

impl HandlerExtension for OperationFunc {
    fn extension_name(&self) -> &'static str {
        "InlineOperationFunc"
    }

    fn validate(&self) -> Result<()> {
        match self.0 {
            Some(_) => Ok(()),
            None => Err(nil_function(self.extension_name(), "OperationFunc")),
        }
    }

    fn install(&self, registry: &mut ExtensionRegistry) {
        if let Some(f) = &self.0 {
            registry.add_factory(Inline(OperationHook(f.clone())));
        }
    }
}

impl HandlerExtension for ResponseFunc {
    fn extension_name(&self) -> &'static str {
        "InlineResponseFunc"
    }

    fn validate(&self) -> Result<()> {
        match self.0 {
            Some(_) => Ok(()),
            None => Err(nil_function(self.extension_name(), "ResponseFunc")),
        }
    }

    fn install(&self, registry: &mut ExtensionRegistry) {
        if let Some(f) = &self.0 {
            registry.add_factory(Inline(ResponseHook(f.clone())));
        }
    }
}

/// Factory for stateless extensions that are cheap to clone
struct Inline<T>(T);

impl<T: Extension + Clone> ExtensionFactory for Inline<T> {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(self.0.clone())
    }
}

#[derive(Clone)]
struct FieldHook(Arc<FieldMiddleware>);

#[async_trait::async_trait]
impl Extension for FieldHook {
    async fn resolve(
        &self,
        ctx: &ExtensionContext<'_>,
        info: ResolveInfo<'_>,
        next: NextResolve<'_>,
    ) -> ServerResult<Option<Value>> {
        let call = FieldCall {
            path: info.path_node.to_string(),
            parent_type: info.parent_type.to_string(),
            return_type: info.return_type.to_string(),
            field_name: info.name.to_string(),
        };
        (self.0)(call, next.run(ctx, info).boxed()).await
    }
}

#[derive(Clone)]
struct OperationHook(Arc<OperationMiddleware>);

#[async_trait::async_trait]
impl Extension for OperationHook {
    async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
        (self.0)(next.run(ctx).boxed()).await
    }
}

#[derive(Clone)]
struct ResponseHook(Arc<ResponseMiddleware>);

#[async_trait::async_trait]
impl Extension for ResponseHook {
    async fn execute(
        &self,
        ctx: &ExtensionContext<'_>,
        operation_name: Option<&str>,
        next: NextExecute<'_>,
    ) -> Response {
        let call = ResponseCall {
            operation_name: operation_name.map(str::to_owned),
        };
        (self.0)(call, next.run(ctx, operation_name).boxed()).await
    }
}

// ============================================================================
// Executor plumbing: query cache and error presenter
// ============================================================================

/// Serves parsed documents from a cache keyed by query text
#[derive(Clone)]
pub(crate) struct QueryCacheExtension(pub(crate) Arc<dyn Cache<ExecutableDocument>>);

#[async_trait::async_trait]
impl Extension for QueryCacheExtension {
    async fn parse_query(
        &self,
        ctx: &ExtensionContext<'_>,
        query: &str,
        variables: &Variables,
        next: NextParseQuery<'_>,
    ) -> ServerResult<ExecutableDocument> {
        if let Some(document) = self.0.get(query) {
            return Ok(document);
        }

        let document = next.run(ctx, query, variables).await?;
        self.0.add(query, document.clone());
        Ok(document)
    }
}

impl ExtensionFactory for QueryCacheExtension {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(self.clone())
    }
}

#[derive(Clone)]
pub(crate) struct ErrorPresenterExtension(pub(crate) ErrorPresenter);

#[async_trait::async_trait]
impl Extension for ErrorPresenterExtension {
    async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
        let mut response = next.run(ctx).await;
        response.errors = response
            .errors
            .into_iter()
            .map(|error| (self.0)(error))
            .collect();
        response
    }
}

impl ExtensionFactory for ErrorPresenterExtension {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(self.clone())
    }
}
