// GraphQL Dispatch - Demo Server
// Run with: cargo run --bin server

//! # Demo Server Binary
//!
//! Serves a small schema through the default dispatch server so every
//! transport can be tried by hand:
//!
//! - `GET  /graphql?query={hello}`
//! - `POST /graphql` with a JSON body, single or batched
//! - `ws://localhost:4000/graphql` for `subscription { countdown(from: 5) }`
//! - GraphiQL at http://localhost:4000
//!
//! Configuration comes from `GRAPHQL_*` environment variables, optionally
//! loaded from a `.env` file.

use std::time::Duration;

use async_graphql::{Context, EmptyMutation, Object, Schema, Subscription};
use futures::{Stream, StreamExt};
use graphql_dispatch::{GraphQLServer, GraphQLServerConfig, OperationTrace};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Query;

#[Object]
impl Query {
    async fn hello(&self, name: Option<String>) -> String {
        format!("Hello, {}!", name.as_deref().unwrap_or("world"))
    }

    async fn add(&self, a: i32, b: i32) -> i32 {
        a + b
    }

    /// Milliseconds since the dispatcher picked up this request
    async fn elapsed_ms(&self, ctx: &Context<'_>) -> Option<u64> {
        ctx.data_opt::<OperationTrace>()
            .map(|trace| trace.start.elapsed().as_millis() as u64)
    }
}

struct Subscription;

#[Subscription]
impl Subscription {
    async fn countdown(&self, from: i32) -> impl Stream<Item = i32> {
        futures::stream::iter((0..=from.max(0)).rev()).then(|n| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            n
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting GraphQL Dispatch Server...");

    let config = GraphQLServerConfig::from_env()?;
    info!("Server: {}:{}", config.host, config.port);

    let schema = Schema::build(Query, EmptyMutation, Subscription);
    GraphQLServer::new(schema, config)?.run().await?;

    Ok(())
}
