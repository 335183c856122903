// HTTP runner for the dispatch server
// Mounts a Handler on an axum router with health, GraphiQL and CORS

use std::net::SocketAddr;
use std::time::Duration;

use async_graphql::{http::GraphiQLSource, ObjectType, SchemaBuilder, SubscriptionType};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::handler::{
    transport::DEFAULT_MAX_UPLOAD_SIZE, DefaultSettings, Server, DEFAULT_PERSISTED_QUERY_CACHE_SIZE,
    DEFAULT_QUERY_CACHE_SIZE,
};
use crate::{DispatchError, Result};

/// GraphQL server configuration
///
/// Every field can be overridden with a `GRAPHQL_` prefixed environment
/// variable, e.g. `GRAPHQL_PORT=8080` or `GRAPHQL_CORS_ENABLED=false`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphQLServerConfig {
    pub host: String,
    pub port: u16,
    /// Path the dispatch handler is mounted on
    pub endpoint: String,
    pub cors_enabled: bool,
    /// Serve GraphiQL at `/`
    pub playground_enabled: bool,
    /// Websocket keep-alive interval; 0 disables it
    pub keep_alive_secs: u64,
    pub query_cache_size: usize,
    pub persisted_query_cache_size: usize,
    pub max_upload_size: usize,
}

impl Default for GraphQLServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            endpoint: "/graphql".to_string(),
            cors_enabled: true,
            playground_enabled: true,
            keep_alive_secs: 10,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
            persisted_query_cache_size: DEFAULT_PERSISTED_QUERY_CACHE_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

impl GraphQLServerConfig {
    /// Defaults overridden by `GRAPHQL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix("GRAPHQL"))
    }

    fn load(environment: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with('/') {
            return Err(DispatchError::InvalidConfig(format!(
                "endpoint must start with '/': {}",
                self.endpoint
            )));
        }
        if self.endpoint == "/health" || (self.playground_enabled && self.endpoint == "/") {
            return Err(DispatchError::InvalidConfig(format!(
                "endpoint {} collides with a built-in route",
                self.endpoint
            )));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                DispatchError::InvalidConfig(format!("bad listen address {}: {}", self.host, e))
            })
    }

    pub fn to_default_settings(&self) -> DefaultSettings {
        DefaultSettings {
            keep_alive_ping_interval: Duration::from_secs(self.keep_alive_secs),
            query_cache_size: self.query_cache_size,
            persisted_query_cache_size: self.persisted_query_cache_size,
            max_upload_size: self.max_upload_size,
        }
    }
}

/// GraphQL server
///
/// Starts from [`Server::new_default_with`]; use [`GraphQLServer::server_mut`]
/// to add extensions or transports before calling [`GraphQLServer::run`].
pub struct GraphQLServer<Q, M, S> {
    config: GraphQLServerConfig,
    server: Server<Q, M, S>,
}

impl<Q, M, S> GraphQLServer<Q, M, S>
where
    Q: ObjectType + 'static,
    M: ObjectType + 'static,
    S: SubscriptionType + 'static,
{
    pub fn new(schema: SchemaBuilder<Q, M, S>, config: GraphQLServerConfig) -> Result<Self> {
        config.validate()?;
        let server = Server::new_default_with(schema, &config.to_default_settings());
        Ok(Self { config, server })
    }

    pub fn config(&self) -> &GraphQLServerConfig {
        &self.config
    }

    pub fn server_mut(&mut self) -> &mut Server<Q, M, S> {
        &mut self.server
    }

    pub fn router(self) -> Router {
        let GraphQLServer { config, server } = self;

        let mut app = Router::new()
            .route("/health", get(health_check))
            .merge(server.into_router(&config.endpoint));

        if config.playground_enabled {
            let page = GraphiQLSource::build()
                .endpoint(&config.endpoint)
                .subscription_endpoint(&config.endpoint)
                .finish();
            app = app.route("/", get(move || graphiql(page.clone())));
        }

        if config.cors_enabled {
            app = app.layer(CorsLayer::permissive());
        }

        app.layer(TraceLayer::new_for_http())
    }

    pub async fn run(self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let port = self.config.port;
        let endpoint = self.config.endpoint.clone();
        let playground = self.config.playground_enabled;

        let app = self.router();

        info!("🚀 GraphQL server running on http://{}", addr);
        if playground {
            info!("📊 GraphiQL interface: http://localhost:{}", port);
        }
        info!("🔗 GraphQL endpoint: http://localhost:{}{}", port, endpoint);
        info!("📡 GraphQL WebSocket: ws://localhost:{}{}", port, endpoint);

        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    }
}

async fn graphiql(page: String) -> impl IntoResponse {
    Html(page)
}

// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "GraphQL dispatch server is running!")
}
