// GraphQL Dispatch - Rust Edition
// Glue between the async-graphql execution engine and the axum/hyper HTTP runtime

//! # GraphQL Dispatch Library
//!
//! This crate does not execute GraphQL on its own. Parsing, validation and
//! resolution belong to [`async_graphql`]; connection handling belongs to
//! [`axum`] and `hyper`. What lives here is the wiring between the two:
//!
//! ### Dispatch Server ([`handler`])
//! - [`Server`]: configuration phase. Holds the transports, in registration
//!   order, and the executor settings (error presenter, recover function,
//!   query cache, extensions, inline middleware).
//! - [`Handler`]: serving phase. Picks the first transport that supports an
//!   inbound request, runs it inside a panic boundary, and answers with the
//!   `{"errors": [...]}` envelope when nothing matches or something panics.
//! - [`transport`]: GET, POST, multipart form, websocket and OPTIONS.
//!
//! ### Client ([`client`])
//! A functional-options builder for outgoing GraphQL requests plus a small
//! `reqwest` based client that posts them.
//!
//! ### HTTP runner ([`server`])
//! Mounts a [`Handler`] on an axum router, configured from the environment.
//!
//! ```rust,no_run
//! use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
//! use graphql_dispatch::Server;
//!
//! struct Query;
//!
//! #[Object]
//! impl Query {
//!     async fn hello(&self) -> &str {
//!         "world"
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new_default(Schema::build(Query, EmptyMutation, EmptySubscription));
//! let app = server.into_router("/graphql");
//!
//! axum::Server::bind(&"127.0.0.1:4000".parse()?)
//!     .serve(app.into_make_service())
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Outgoing request construction and sending
pub mod client;

// Transport dispatch, executor configuration, extensions and caches
pub mod handler;

// HTTP server runner and its configuration
pub mod server;

pub use client::{Client, RawResponse, Request, RequestOption};
pub use handler::{
    extension::{
        AutomaticPersistedQuery, FieldFunc, HandlerExtension, Introspection, OperationFunc,
        ResponseFunc,
    },
    lru::{Cache, Lru},
    transport::{self, OperationTrace, RequestHeaders, Transport},
    DefaultSettings, Handler, Server,
};
pub use server::graphql::{GraphQLServer, GraphQLServerConfig};

use thiserror::Error;

/// Errors surfaced to callers at configuration time or by the client.
///
/// Request-time failures inside the [`Handler`] never show up here: they are
/// turned into the JSON error envelope before the response leaves the
/// dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// An extension refused to be registered
    #[error("Invalid extension {name}: {reason}")]
    InvalidExtension { name: String, reason: String },

    /// A header added through the option builder could not be sent
    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// The request URL could not be parsed or resolved
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered with a non-empty `errors` list
    #[error("GraphQL error: {errors}")]
    GraphQL { errors: serde_json::Value },

    /// The server answered with something that is not a GraphQL response
    #[error("Unexpected response ({status}): {body}")]
    Decode { status: u16, body: String },

    /// Transport-level failure while sending a request
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration was loaded but does not make sense
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP server stopped with an error
    #[error("Server error: {0}")]
    Serve(#[from] hyper::Error),
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, DispatchError>;
