use std::time::Duration;

use async_graphql::{
    http::{WebSocketProtocols, ALL_WEBSOCKET_PROTOCOLS},
    Data, Executor,
};
use async_graphql_axum::{GraphQLProtocol, GraphQLWebSocket};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, WebSocketUpgrade,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::{
    channel::mpsc::{self, UnboundedReceiver},
    future,
    stream::SplitSink,
    SinkExt, StreamExt,
};
use serde_json::Value;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::{is_websocket_upgrade, OperationTrace, RequestHeaders, Transport};

pub const DEFAULT_KEEP_ALIVE_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Subscriptions over a websocket upgrade
///
/// Speaks both `graphql-ws` and `graphql-transport-ws`; the protocol is
/// picked from `Sec-WebSocket-Protocol`. The connection is served until
/// either side closes it.
///
/// Once the connection is acknowledged a keep-alive frame is sent every
/// `keep_alive_ping_interval`: `{"type":"ka"}` for `graphql-ws` and
/// `{"type":"ping"}` for `graphql-transport-ws`.
#[derive(Debug, Clone, Copy)]
pub struct Websocket {
    /// Zero disables keep-alive frames
    pub keep_alive_ping_interval: Duration,
}

impl Default for Websocket {
    fn default() -> Self {
        Self {
            keep_alive_ping_interval: DEFAULT_KEEP_ALIVE_PING_INTERVAL,
        }
    }
}

#[async_trait]
impl<E: Executor> Transport<E> for Websocket {
    fn supports(&self, request: &Request<Body>) -> bool {
        is_websocket_upgrade(request)
    }

    async fn serve(&self, request: Request<Body>, executor: E) -> Response {
        let (mut parts, _body) = request.into_parts();

        let protocol = match GraphQLProtocol::from_request_parts(&mut parts, &()).await {
            Ok(protocol) => protocol,
            Err(rejection) => return rejection.into_response(),
        };
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };

        let mut data = Data::default();
        if let Some(trace) = parts.extensions.get::<OperationTrace>().copied() {
            data.insert(trace);
        }
        data.insert(RequestHeaders(parts.headers.clone()));

        let keep_alive = if self.keep_alive_ping_interval.is_zero() {
            None
        } else {
            keep_alive_frame(&parts.headers).map(|frame| (self.keep_alive_ping_interval, frame))
        };

        debug!("Upgrading to GraphQL websocket");
        upgrade
            .protocols(ALL_WEBSOCKET_PROTOCOLS)
            .on_upgrade(move |socket| async move {
                let (sink, stream) = socket.split();
                let (outgoing, pending) = mpsc::unbounded();

                let connection =
                    GraphQLWebSocket::new_with_pair(outgoing, stream, executor, protocol)
                        .with_data(data)
                        .serve();
                future::join(connection, write_frames(sink, pending, keep_alive)).await;
            })
    }
}

/// Keep-alive frame for the negotiated sub-protocol
fn keep_alive_frame(headers: &HeaderMap) -> Option<&'static str> {
    let protocol = headers
        .get(SEC_WEBSOCKET_PROTOCOL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|name| name.trim().parse::<WebSocketProtocols>().ok())?;

    Some(match protocol {
        WebSocketProtocols::SubscriptionsTransportWS => r#"{"type":"ka"}"#,
        WebSocketProtocols::GraphQLWS => r#"{"type":"ping"}"#,
    })
}

/// Forwards engine messages to the socket, interleaving keep-alive frames
/// after `connection_ack` has gone out
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut pending: UnboundedReceiver<Message>,
    keep_alive: Option<(Duration, &'static str)>,
) {
    let mut ticker: Option<(Interval, &'static str)> = None;

    loop {
        let message = tokio::select! {
            message = pending.next() => match message {
                Some(message) => message,
                None => break,
            },
            frame = tick(&mut ticker) => Message::Text(frame.to_string()),
        };

        let acked = ticker.is_none() && is_connection_ack(&message);
        if sink.send(message).await.is_err() {
            break;
        }

        if acked {
            if let Some((period, frame)) = keep_alive {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker = Some((interval, frame));
            }
        }
    }

    let _ = sink.close().await;
}

async fn tick(ticker: &mut Option<(Interval, &'static str)>) -> &'static str {
    match ticker {
        Some((interval, frame)) => {
            interval.tick().await;
            *frame
        }
        None => future::pending().await,
    }
}

fn is_connection_ack(message: &Message) -> bool {
    match message {
        Message::Text(text) => serde_json::from_str::<Value>(text)
            .map(|value| value["type"] == "connection_ack")
            .unwrap_or(false),
        _ => false,
    }
}
