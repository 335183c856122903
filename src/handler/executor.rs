// Executor configuration: everything that ends up inside the engine's schema

use std::any::Any;
use std::sync::Arc;

use async_graphql::{
    parser::types::ExecutableDocument, ObjectType, Schema, SchemaBuilder, ServerError,
    SubscriptionType,
};
use tracing::{debug, error};

use super::extension::{
    ErrorPresenter, ErrorPresenterExtension, ExtensionRegistry, FieldFunc, HandlerExtension,
    OperationFunc, QueryCacheExtension, ResponseFunc, SharedFactory,
};
use super::lru::Cache;
use crate::Result;

/// Turns a panic payload into the error reported to the client
pub type RecoverFunc = Arc<dyn Fn(&(dyn Any + Send)) -> ServerError + Send + Sync>;

/// Logs the panic and hides its details from the client
pub fn default_recover(payload: &(dyn Any + Send)) -> ServerError {
    error!("GraphQL request panicked: {}", panic_message(payload));
    ServerError::new("internal system error", None)
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Wraps an async-graphql schema builder until the server starts serving
///
/// Settings are collected here and applied in one go by [`Executor::finish`];
/// after that the schema is immutable.
pub struct Executor<Q, M, S> {
    builder: SchemaBuilder<Q, M, S>,
    registry: ExtensionRegistry,
    error_presenter: Option<ErrorPresenter>,
    recover_func: RecoverFunc,
    query_cache: Option<Arc<dyn Cache<ExecutableDocument>>>,
}

impl<Q, M, S> Executor<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    pub fn new(builder: SchemaBuilder<Q, M, S>) -> Self {
        Self {
            builder,
            registry: ExtensionRegistry::default(),
            error_presenter: None,
            recover_func: Arc::new(default_recover),
            query_cache: None,
        }
    }

    pub fn set_error_presenter(&mut self, presenter: ErrorPresenter) {
        self.error_presenter = Some(presenter);
    }

    pub fn set_recover_func(&mut self, recover: RecoverFunc) {
        self.recover_func = recover;
    }

    pub fn set_query_cache(&mut self, cache: Arc<dyn Cache<ExecutableDocument>>) {
        self.query_cache = Some(cache);
    }

    /// Validate, then install
    pub fn use_extension(&mut self, extension: impl HandlerExtension) -> Result<()> {
        extension.validate()?;
        self.install(&extension);
        Ok(())
    }

    pub(crate) fn install(&mut self, extension: &dyn HandlerExtension) {
        debug!("Installing extension {}", extension.extension_name());
        extension.install(&mut self.registry);
        self.registry.names.push(extension.extension_name());
    }

    pub fn around_fields(&mut self, f: FieldFunc) -> Result<()> {
        self.use_extension(f)
    }

    pub fn around_operations(&mut self, f: OperationFunc) -> Result<()> {
        self.use_extension(f)
    }

    pub fn around_responses(&mut self, f: ResponseFunc) -> Result<()> {
        self.use_extension(f)
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Build the schema; the presenter runs outermost, then the query cache,
    /// then registered extensions in registration order
    pub(crate) fn finish(self) -> (Schema<Q, M, S>, PanicRecovery) {
        let Executor {
            mut builder,
            registry,
            error_presenter,
            recover_func,
            query_cache,
        } = self;

        if let Some(presenter) = &error_presenter {
            builder = builder.extension(ErrorPresenterExtension(presenter.clone()));
        }
        if let Some(cache) = query_cache {
            builder = builder.extension(QueryCacheExtension(cache));
        }
        for factory in registry.factories {
            builder = builder.extension(SharedFactory(factory));
        }
        if !registry.introspection {
            builder = builder.disable_introspection();
        }

        let recovery = PanicRecovery {
            recover_func,
            error_presenter,
        };
        (builder.finish(), recovery)
    }
}

/// Recover function and presenter kept by the handler for its panic boundary
#[derive(Clone)]
pub struct PanicRecovery {
    recover_func: RecoverFunc,
    error_presenter: Option<ErrorPresenter>,
}

impl PanicRecovery {
    pub fn present_recovered_error(&self, payload: &(dyn Any + Send)) -> ServerError {
        let error = (self.recover_func)(payload);
        match &self.error_presenter {
            Some(presenter) => presenter(error),
            None => error,
        }
    }
}
