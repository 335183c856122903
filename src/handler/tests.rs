// Integration tests for the dispatch server
use super::*;
use crate::handler::{extension::compute_query_hash, transport::RequestHeaders};

use std::sync::atomic::{AtomicUsize, Ordering};

use async_graphql::{
    Context, EmptySubscription, Object, Schema as GraphQLSchema, Value as GraphQLValue,
};
use async_trait::async_trait;
use axum::{
    http::header::{ALLOW, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE},
    response::IntoResponse,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

// Test schema
struct Query;

#[Object]
impl Query {
    async fn hello(&self) -> &str {
        "world"
    }

    async fn add(&self, a: i32, b: i32) -> i32 {
        a + b
    }

    async fn authorization(&self, ctx: &Context<'_>) -> Option<String> {
        ctx.data_opt::<RequestHeaders>()
            .and_then(|headers| headers.0.get(AUTHORIZATION))
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    }

    async fn traced(&self, ctx: &Context<'_>) -> bool {
        ctx.data_opt::<OperationTrace>().is_some()
    }

    async fn fail(&self) -> async_graphql::Result<i32> {
        Err("resolver failed".into())
    }
}

struct Mutation;

#[Object]
impl Mutation {
    async fn noop(&self) -> bool {
        true
    }
}

type TestSchema = GraphQLSchema<Query, Mutation, EmptySubscription>;

fn schema() -> SchemaBuilder<Query, Mutation, EmptySubscription> {
    GraphQLSchema::build(Query, Mutation, EmptySubscription)
}

// Test transports
struct Counting {
    accepts: bool,
    status: StatusCode,
    hits: Arc<AtomicUsize>,
}

impl Counting {
    fn new(accepts: bool, status: StatusCode) -> (Self, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let transport = Self {
            accepts,
            status,
            hits: hits.clone(),
        };
        (transport, hits)
    }
}

#[async_trait]
impl<E: async_graphql::Executor> Transport<E> for Counting {
    fn supports(&self, _request: &Request<Body>) -> bool {
        self.accepts
    }

    async fn serve(&self, _request: Request<Body>, _executor: E) -> Response {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.status.into_response()
    }
}

/// Panics when it sees `/boom`, otherwise answers 204
struct Panicking;

#[async_trait]
impl<E: async_graphql::Executor> Transport<E> for Panicking {
    fn supports(&self, _request: &Request<Body>) -> bool {
        true
    }

    async fn serve(&self, request: Request<Body>, _executor: E) -> Response {
        if request.uri().path() == "/boom" {
            panic!("boom");
        }
        StatusCode::NO_CONTENT.into_response()
    }
}

// Test helpers
async fn send(handler: &Handler<TestSchema>, request: Request<Body>) -> (StatusCode, Value) {
    let response = handler.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(body: Value) -> Request<Body> {
    Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(query_string: &str) -> Request<Body> {
    Request::get(format!("/graphql?{}", query_string))
        .body(Body::empty())
        .unwrap()
}

fn post_only(mut srv: Server<Query, Mutation, EmptySubscription>) -> Handler<TestSchema> {
    srv.add_transport(Post);
    srv.handler()
}

// Dispatch
#[tokio::test]
async fn test_no_transport_is_bad_request() {
    let handler = Server::new(schema()).handler();

    let (status, body) = send(&handler, get("query=%7Bhello%7D")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"errors": [{"message": "transport not supported"}]}));
}

#[tokio::test]
async fn test_first_supporting_transport_wins() {
    let (first, first_hits) = Counting::new(true, StatusCode::ACCEPTED);
    let (second, second_hits) = Counting::new(true, StatusCode::CREATED);

    let mut srv = Server::new(schema());
    srv.add_transport(first);
    srv.add_transport(second);
    let handler = srv.handler();

    let (status, _) = send(&handler, get("")).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(second_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsupporting_transports_are_skipped() {
    let (declines, declined_hits) = Counting::new(false, StatusCode::ACCEPTED);
    let (accepts, accepted_hits) = Counting::new(true, StatusCode::CREATED);

    let mut srv = Server::new(schema());
    srv.add_transport(declines);
    srv.add_transport(accepts);
    assert_eq!(srv.transport_count(), 2);
    let handler = srv.handler();

    let (status, _) = send(&handler, get("")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(declined_hits.load(Ordering::SeqCst), 0);
    assert_eq!(accepted_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panic_becomes_unprocessable_entity() {
    let mut srv = Server::new(schema());
    srv.add_transport(Panicking);
    let handler = srv.handler();

    let request = Request::get("/boom").body(Body::empty()).unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({"errors": [{"message": "internal system error"}]}));

    // The handler keeps serving after a panic
    let request = Request::get("/fine").body(Body::empty()).unwrap();
    let (status, _) = send(&handler, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_custom_recover_func_and_presenter() {
    let mut srv = Server::new(schema());
    srv.add_transport(Panicking);
    srv.set_recover_func(|payload| {
        ServerError::new(format!("recovered: {}", executor::panic_message(payload)), None)
    });
    srv.set_error_presenter(|mut error| {
        error.message = format!("presented {}", error.message);
        error
    });
    let handler = srv.handler();

    let request = Request::get("/boom").body(Body::empty()).unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["message"], "presented recovered: boom");
}

// Built-in transports
#[test]
fn test_default_server_registers_transports_and_extensions() {
    let srv = Server::new_default(schema());

    assert_eq!(srv.transport_count(), 5);
    assert_eq!(
        srv.extension_names(),
        &["Introspection", "AutomaticPersistedQuery"]
    );
}

#[tokio::test]
async fn test_get_query() {
    let handler = Server::new_default(schema()).handler();

    let (status, body) = send(&handler, get("query=%7B%20hello%20%7D")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hello"], "world");
}

#[tokio::test]
async fn test_get_with_variables() {
    let handler = Server::new_default(schema()).handler();

    // query ($a: Int!) { add(a: $a, b: 2) }   variables {"a": 40}
    let query_string = "query=query%20(%24a%3A%20Int!)%20%7B%20add(a%3A%20%24a%2C%20b%3A%202)%20%7D\
                        &variables=%7B%22a%22%3A40%7D";
    let (status, body) = send(&handler, get(query_string)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["add"], 42);
}

#[tokio::test]
async fn test_get_mutation_is_not_acceptable() {
    let handler = Server::new_default(schema()).handler();

    let (status, body) = send(&handler, get("query=mutation%20%7B%20noop%20%7D")).await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(
        body,
        json!({"errors": [{"message": "GET requests only allow query operations"}]})
    );
}

#[tokio::test]
async fn test_post_query_and_mutation() {
    let handler = Server::new_default(schema()).handler();

    let (status, body) = send(&handler, post_json(json!({"query": "{ add(a: 1, b: 2) }"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["add"], 3);

    let (status, body) = send(&handler, post_json(json!({"query": "mutation { noop }"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["noop"], true);
}

#[tokio::test]
async fn test_post_batch() {
    let handler = Server::new_default(schema()).handler();

    let batch = json!([{"query": "{ hello }"}, {"query": "{ add(a: 2, b: 2) }"}]);
    let (status, body) = send(&handler, post_json(batch)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["data"]["hello"], "world");
    assert_eq!(body[1]["data"]["add"], 4);
}

#[tokio::test]
async fn test_post_invalid_json() {
    let handler = Server::new_default(schema()).handler();

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["errors"][0]["message"].as_str().unwrap();
    assert!(message.starts_with("json request body could not be decoded: "));
}

#[tokio::test]
async fn test_post_with_unknown_content_type_is_unsupported() {
    let handler = Server::new_default(schema()).handler();

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("{ hello }"))
        .unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["message"], "transport not supported");
}

#[tokio::test]
async fn test_request_context_reaches_resolvers() {
    let handler = Server::new_default(schema()).handler();

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .header(AUTHORIZATION, "Bearer token")
        .body(Body::from(json!({"query": "{ authorization traced }"}).to_string()))
        .unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["authorization"], "Bearer token");
    assert_eq!(body["data"]["traced"], true);
}

#[tokio::test]
async fn test_options_and_head() {
    let handler = Server::new_default(schema()).handler();

    let request = Request::options("/graphql").body(Body::empty()).unwrap();
    let response = handler.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ALLOW], "OPTIONS, GET, POST");

    let request = Request::head("/graphql").body(Body::empty()).unwrap();
    let response = handler.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

fn multipart_request(operations: &str) -> Request<Body> {
    let body = format!(
        "--BOUNDARY\r\n\
         Content-Disposition: form-data; name=\"operations\"\r\n\r\n\
         {}\r\n\
         --BOUNDARY\r\n\
         Content-Disposition: form-data; name=\"map\"\r\n\r\n\
         {{}}\r\n\
         --BOUNDARY--\r\n",
        operations
    );
    Request::post("/graphql")
        .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_multipart_form() {
    let handler = Server::new_default(schema()).handler();

    let (status, body) = send(&handler, multipart_request(r#"{"query":"{ hello }"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hello"], "world");
}

#[tokio::test]
async fn test_multipart_too_large() {
    let settings = DefaultSettings {
        max_upload_size: 16,
        ..DefaultSettings::default()
    };
    let handler = Server::new_default_with(schema(), &settings).handler();

    let (status, body) = send(&handler, multipart_request(r#"{"query":"{ hello }"}"#)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("request body too large"));
}

#[tokio::test]
async fn test_multipart_stops_reading_past_the_limit() {
    const CHUNK: usize = 16 * 1024;
    let settings = DefaultSettings {
        max_upload_size: 16,
        ..DefaultSettings::default()
    };
    let handler = Server::new_default_with(schema(), &settings).handler();

    // 1 MiB offered in 16 KiB chunks, counting what the server pulls
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let chunks = futures::stream::iter(0..64).map(move |_| {
        counter.fetch_add(CHUNK, Ordering::SeqCst);
        Ok::<_, std::io::Error>(vec![b'x'; CHUNK])
    });
    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
        .body(Body::wrap_stream(chunks))
        .unwrap();

    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("request body too large"));
    assert!(pulled.load(Ordering::SeqCst) <= 2 * CHUNK);
}

#[tokio::test]
async fn test_multipart_rejects_declared_length_up_front() {
    let settings = DefaultSettings {
        max_upload_size: 16,
        ..DefaultSettings::default()
    };
    let handler = Server::new_default_with(schema(), &settings).handler();

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
        .header(CONTENT_LENGTH, "1048576")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("1048576 > 16 bytes"));
}

#[tokio::test]
async fn test_multipart_malformed() {
    let handler = Server::new_default(schema()).handler();

    let request = Request::post("/graphql")
        .header(CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
        .body(Body::from("garbage"))
        .unwrap();
    let (status, body) = send(&handler, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .starts_with("failed to parse multipart form"));
}

// Extensions
const INTROSPECTION_QUERY: &str = "{ __schema { queryType { name } } }";

#[tokio::test]
async fn test_introspection_disabled_without_extension() {
    let handler = post_only(Server::new(schema()));

    let (_, body) = send(&handler, post_json(json!({"query": INTROSPECTION_QUERY}))).await;

    assert_ne!(body["data"]["__schema"]["queryType"]["name"], "Query");
}

#[tokio::test]
async fn test_introspection_enabled_by_extension() {
    let mut srv = Server::new(schema());
    srv.use_extension(Introspection).unwrap();
    let handler = post_only(srv);

    let (_, body) = send(&handler, post_json(json!({"query": INTROSPECTION_QUERY}))).await;

    assert_eq!(body["data"]["__schema"]["queryType"]["name"], "Query");
}

#[tokio::test]
async fn test_error_presenter_rewrites_resolver_errors() {
    let mut srv = Server::new(schema());
    srv.set_error_presenter(|mut error| {
        error.message = format!("presented: {}", error.message);
        error
    });
    let handler = post_only(srv);

    let (_, body) = send(&handler, post_json(json!({"query": "{ fail }"}))).await;

    assert_eq!(body["errors"][0]["message"], "presented: resolver failed");
}

#[tokio::test]
async fn test_unset_middleware_is_rejected() {
    let mut srv = Server::new(schema());

    let err = srv.around_fields(FieldFunc::default()).unwrap_err();
    assert!(err.to_string().contains("FieldFunc can not be nil"));
    assert!(srv.around_operations(OperationFunc::default()).is_err());
    assert!(srv.around_responses(ResponseFunc::default()).is_err());

    assert!(srv.extension_names().is_empty());
}

#[tokio::test]
async fn test_around_fields_sees_every_field() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();

    let mut srv = Server::new(schema());
    srv.around_fields(FieldFunc::new(move |call, next| {
        recorder.lock().push(call.field_name);
        next
    }))
    .unwrap();
    let handler = post_only(srv);

    let (_, body) = send(&handler, post_json(json!({"query": "{ hello add(a: 1, b: 1) }"}))).await;

    assert_eq!(body["data"]["hello"], "world");
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["add".to_string(), "hello".to_string()]);
}

#[tokio::test]
async fn test_around_fields_can_short_circuit() {
    let mut srv = Server::new(schema());
    srv.around_fields(FieldFunc::new(|_call, _next| {
        async { Ok(Some(GraphQLValue::from("intercepted"))) }.boxed()
    }))
    .unwrap();
    let handler = post_only(srv);

    let (_, body) = send(&handler, post_json(json!({"query": "{ hello }"}))).await;

    assert_eq!(body["data"]["hello"], "intercepted");
}

#[tokio::test]
async fn test_around_operations_runs_once_per_operation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut srv = Server::new(schema());
    srv.around_operations(OperationFunc::new(move |next| {
        counter.fetch_add(1, Ordering::SeqCst);
        next
    }))
    .unwrap();
    let handler = post_only(srv);

    send(&handler, post_json(json!({"query": "{ hello add(a: 1, b: 1) }"}))).await;
    send(&handler, post_json(json!({"query": "{ hello }"}))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_around_responses_gets_operation_name() {
    let names = Arc::new(Mutex::new(Vec::new()));
    let recorder = names.clone();

    let mut srv = Server::new(schema());
    srv.around_responses(ResponseFunc::new(move |call, next| {
        recorder.lock().push(call.operation_name);
        next
    }))
    .unwrap();
    assert_eq!(srv.extension_names(), &["InlineResponseFunc"]);
    let handler = post_only(srv);

    let request = json!({"query": "query Greeting { hello }", "operationName": "Greeting"});
    let (_, body) = send(&handler, post_json(request)).await;

    assert_eq!(body["data"]["hello"], "world");
    assert_eq!(*names.lock(), vec![Some("Greeting".to_string())]);
}

/// Query cache that counts hits and insertions
struct CountingCache {
    inner: Lru<ExecutableDocument>,
    hits: AtomicUsize,
    adds: AtomicUsize,
}

impl Cache<ExecutableDocument> for CountingCache {
    fn get(&self, key: &str) -> Option<ExecutableDocument> {
        let document = self.inner.get(key);
        if document.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        document
    }

    fn add(&self, key: &str, value: ExecutableDocument) {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.inner.add(key, value);
    }
}

#[tokio::test]
async fn test_query_cache_reuses_parsed_documents() {
    let cache = Arc::new(CountingCache {
        inner: Lru::new(10),
        hits: AtomicUsize::new(0),
        adds: AtomicUsize::new(0),
    });

    let mut srv = Server::new(schema());
    srv.set_query_cache(cache.clone());
    let handler = post_only(srv);

    for _ in 0..3 {
        let (_, body) = send(&handler, post_json(json!({"query": "{ hello }"}))).await;
        assert_eq!(body["data"]["hello"], "world");
    }

    assert_eq!(cache.adds.load(Ordering::SeqCst), 1);
    assert_eq!(cache.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_automatic_persisted_query_flow() {
    let handler = Server::new_default(schema()).handler();
    let query = "{ hello }";
    let hash = compute_query_hash(query);
    let persisted = json!({"persistedQuery": {"version": 1, "sha256Hash": hash}});

    // Unknown hash
    let (status, body) = send(&handler, post_json(json!({"extensions": persisted}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["message"], "PersistedQueryNotFound");
    assert_eq!(
        body["errors"][0]["extensions"]["code"],
        "PERSISTED_QUERY_NOT_FOUND"
    );

    // Register
    let (_, body) = send(
        &handler,
        post_json(json!({"query": query, "extensions": persisted})),
    )
    .await;
    assert_eq!(body["data"]["hello"], "world");

    // Hash only
    let (_, body) = send(&handler, post_json(json!({"extensions": persisted}))).await;
    assert_eq!(body["data"]["hello"], "world");
}

#[tokio::test]
async fn test_automatic_persisted_query_hash_mismatch() {
    let handler = Server::new_default(schema()).handler();
    let persisted = json!({"persistedQuery": {"version": 1, "sha256Hash": "deadbeef"}});

    let (_, body) = send(
        &handler,
        post_json(json!({"query": "{ hello }", "extensions": persisted})),
    )
    .await;

    assert_eq!(
        body["errors"][0]["message"],
        "provided APQ hash does not match query"
    );
}

#[tokio::test]
async fn test_into_router_serves_the_handler() {
    let app = Server::new_default(schema()).into_router("/graphql");

    let response = app
        .oneshot(post_json(json!({"query": "{ hello }"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["hello"], "world");
}
