// GraphQL Dispatch server runners
// Everything needed to put a dispatch Handler on the network

//! # Server Module
//!
//! The [`handler`](crate::handler) module produces a tower service; this
//! module wraps it into a runnable HTTP server:
//! ```text
//! GraphQLServerConfig (defaults, GRAPHQL_* environment)
//!        ↓
//! GraphQLServer ← dispatch Server + /health + GraphiQL + CORS
//!        ↓ run()
//! axum / hyper
//! ```

/// GraphQL HTTP server and its configuration
pub mod graphql;

pub use graphql::{GraphQLServer, GraphQLServerConfig};
