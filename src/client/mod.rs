//! GraphQL client
//!
//! Outgoing requests are built by applying [`RequestOption`]s, in order, to
//! an empty [`Request`]. Nothing touches the network until [`Client::post`]
//! or [`Client::raw_post`] sends the finished request.

pub mod options;

pub use options::{add_cookie, add_header, basic_auth, operation, path, var};

use std::sync::Arc;

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::{DispatchError, Result};

/// A mutation applied to an outgoing [`Request`]
///
/// Options are plain functions so they can be stored on a [`Client`] and
/// applied to every request it builds.
pub type RequestOption = Box<dyn Fn(&mut Request) + Send + Sync>;

/// Ordered multi-map of header values with case-insensitive names
///
/// Names and values are kept as given; they are only checked when the
/// request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values for `name`, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A GraphQL call under construction
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Option<Map<String, Value>>,
    pub headers: Headers,
    /// Cookies by name; a name appears at most once
    pub cookies: Vec<(String, String)>,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Apply options left to right
    pub fn apply<'a>(&mut self, options: impl IntoIterator<Item = &'a RequestOption>) {
        for option in options {
            option(self);
        }
    }

    /// Set `Authorization: Basic ...`, replacing any earlier value
    pub fn set_basic_auth(&mut self, username: &str, password: &str) {
        self.headers.set(
            "Authorization",
            format!("Basic {}", encode_basic_auth(username, password)),
        );
    }

    /// Set a cookie, replacing an existing cookie with the same name
    pub fn set_cookie(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.cookies.push((key, value)),
        }
    }

    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// JSON body in the GraphQL-over-HTTP shape
    pub fn body(&self) -> RequestBody<'_> {
        RequestBody {
            query: &self.query,
            operation_name: self.operation_name.as_deref(),
            variables: self.variables.as_ref(),
        }
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in self.headers.iter() {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| DispatchError::InvalidHeader {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| DispatchError::InvalidHeader {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
            map.append(header_name, header_value);
        }

        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::from_str(&cookie).map_err(|e| DispatchError::InvalidHeader {
                name: COOKIE.to_string(),
                message: e.to_string(),
            })?;
            map.append(COOKIE, value);
        }

        Ok(map)
    }
}

/// Wire form of an outgoing request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<&'a Map<String, Value>>,
}

/// A GraphQL response as received, before `data` is decoded
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub extensions: Option<Map<String, Value>>,
}

impl RawResponse {
    pub fn has_errors(&self) -> bool {
        match &self.errors {
            Some(Value::Array(errors)) => !errors.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// Sends GraphQL requests to a single endpoint
#[derive(Clone)]
pub struct Client {
    endpoint: String,
    http_client: reqwest::Client,
    options: Arc<Vec<RequestOption>>,
}

impl Client {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http_client: reqwest::Client::new(),
            options: Arc::new(Vec::new()),
        }
    }

    /// Options applied to every request before the per-call options
    pub fn with_options(mut self, options: Vec<RequestOption>) -> Self {
        self.options = Arc::new(options);
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build a request without sending it
    pub fn request(&self, query: &str, options: &[RequestOption]) -> Request {
        let mut request = Request::new(query);
        request.url = self.endpoint.clone();
        request.apply(self.options.iter());
        request.apply(options);
        request
    }

    /// Send a query and decode `data` into `T`
    ///
    /// A response carrying errors is returned as [`DispatchError::GraphQL`].
    pub async fn post<T: DeserializeOwned>(
        &self,
        query: &str,
        options: &[RequestOption],
    ) -> Result<T> {
        let response = self.raw_post(query, options).await?;
        if response.has_errors() {
            return Err(DispatchError::GraphQL {
                errors: response.errors.unwrap_or_default(),
            });
        }
        Ok(serde_json::from_value(response.data)?)
    }

    /// Send a query and return the response undecoded
    pub async fn raw_post(&self, query: &str, options: &[RequestOption]) -> Result<RawResponse> {
        let request = self.request(query, options);
        self.send(&request).await
    }

    /// Send an already built request
    pub async fn send(&self, request: &Request) -> Result<RawResponse> {
        let url = self.resolve_url(&request.url)?;
        debug!(
            "Posting GraphQL request to '{}' (operation: {:?})",
            url, request.operation_name
        );

        let response = self
            .http_client
            .post(url)
            .headers(request.header_map()?)
            .json(&request.body())
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        serde_json::from_slice::<RawResponse>(&bytes).map_err(|_| DispatchError::Decode {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    /// Absolute URLs are used as is; anything else is joined onto the endpoint
    fn resolve_url(&self, target: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }
        let base = Url::parse(&self.endpoint)
            .map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", self.endpoint, e)))?;
        base.join(target)
            .map_err(|e| DispatchError::InvalidUrl(format!("{}: {}", target, e)))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("options", &self.options.len())
            .finish()
    }
}

pub(crate) fn encode_basic_auth(username: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password))
}
