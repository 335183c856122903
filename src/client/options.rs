//! Request options
//!
//! Every function here returns a [`RequestOption`] instead of touching a
//! request directly, so options can be collected, stored and applied later.

use serde_json::{Map, Value};

use super::{Request, RequestOption};

/// Add a variable to the outgoing request. A later `var` with the same name wins.
pub fn var(name: impl Into<String>, value: impl Into<Value>) -> RequestOption {
    let name = name.into();
    let value = value.into();
    Box::new(move |request: &mut Request| {
        request
            .variables
            .get_or_insert_with(Map::new)
            .insert(name.clone(), value.clone());
    })
}

/// Set the operation to run when the document defines several
pub fn operation(name: impl Into<String>) -> RequestOption {
    let name = name.into();
    Box::new(move |request: &mut Request| {
        request.operation_name = Some(name.clone());
    })
}

/// Set the URL this request is sent to
///
/// Useful when the whole router is mounted and the GraphQL endpoint lives on
/// a sub-path. Relative paths are resolved against the client's endpoint.
pub fn path(url: impl Into<String>) -> RequestOption {
    let url = url.into();
    Box::new(move |request: &mut Request| {
        request.url = url.clone();
    })
}

/// Add a header, keeping earlier values for the same name
pub fn add_header(key: impl Into<String>, value: impl Into<String>) -> RequestOption {
    let key = key.into();
    let value = value.into();
    Box::new(move |request: &mut Request| {
        request.headers.add(key.clone(), value.clone());
    })
}

/// Authenticate with HTTP basic auth
pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> RequestOption {
    let username = username.into();
    let password = password.into();
    Box::new(move |request: &mut Request| {
        request.set_basic_auth(&username, &password);
    })
}

/// Set a cookie. Unlike [`add_header`], a cookie with the same name is replaced.
pub fn add_cookie(key: impl Into<String>, value: impl Into<String>) -> RequestOption {
    let key = key.into();
    let value = value.into();
    Box::new(move |request: &mut Request| {
        request.set_cookie(key.clone(), value.clone());
    })
}
