// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The network seam shared by both orchestrators.

use std::fmt::Debug;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{Value, json};
use syncwell_auth::Token;

use crate::TransportError;

/// Sends requests addressed by resource key.
///
/// The orchestrators only need "send this request, give me status, headers and body"; HTTP
/// semantics beyond that belong to the implementation. Implementations should abort the
/// underlying work when the returned future is dropped.
pub trait Transport: Send + Sync + Debug {
    /// Sends `request`.
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse, TransportError>>;
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl TransportRequest {
    /// Creates a bodiless request for `url`.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Adds every header in `headers`, replacing existing values.
    #[must_use]
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn with_json_body(mut self, body: Bytes) -> Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(body);
        self
    }

    /// Attaches `Authorization: Bearer <token>`.
    ///
    /// A token that cannot be expressed as a header value is skipped.
    #[must_use]
    pub fn with_bearer(mut self, token: Option<&Token>) -> Self {
        if let Some(token) = token {
            match HeaderValue::from_str(&token.bearer()) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    self.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!(request.url = %self.url, "credential is not a valid header value, sending without it"),
            }
        }
        self
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the resource key or URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// A response as received by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TransportResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body }
    }

    /// Creates a response with a JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(status, headers, Bytes::from(body.to_string()))
    }

    /// Creates a response with a plain-text body.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self::new(status, headers, Bytes::from(body.into()))
    }

    /// Creates a response with no body.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::new())
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn declares_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("json"))
    }

    /// Parses the body without failing.
    ///
    /// Bodies declared as JSON are decoded as JSON, and yield `None` when they do not decode.
    /// Anything else that is non-empty text becomes `{"message": <text>}`. Empty or binary
    /// bodies yield `None`.
    #[must_use]
    pub fn parse_permissive(&self) -> Option<Value> {
        if self.body.is_empty() {
            return None;
        }

        if self.declares_json() {
            return serde_json::from_slice(&self.body).ok();
        }

        let text = std::str::from_utf8(&self.body).ok()?.trim();
        (!text.is_empty()).then(|| json!({ "message": text }))
    }
}

/// Extracts a human-readable message from a parsed error body.
pub(crate) fn server_message(body: Option<&Value>) -> Option<String> {
    let body = body?;
    ["message", "error"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .or_else(|| body.as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_is_parsed_as_json() {
        let response = TransportResponse::json(StatusCode::OK, &json!({"id": 7}));
        assert_eq!(response.parse_permissive(), Some(json!({"id": 7})));
    }

    #[test]
    fn text_body_becomes_message() {
        let response = TransportResponse::text(StatusCode::BAD_REQUEST, "  name is required ");
        assert_eq!(response.parse_permissive(), Some(json!({"message": "name is required"})));
    }

    #[test]
    fn malformed_json_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let response = TransportResponse::new(StatusCode::OK, headers, Bytes::from_static(b"<html>oops</html>"));

        assert_eq!(response.parse_permissive(), None);
    }

    #[test]
    fn empty_or_binary_body_is_none() {
        assert_eq!(TransportResponse::empty(StatusCode::NO_CONTENT).parse_permissive(), None);

        let binary = TransportResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(&[0xff, 0xfe]));
        assert_eq!(binary.parse_permissive(), None);
    }

    #[test]
    fn server_message_prefers_message_then_error() {
        assert_eq!(server_message(Some(&json!({"message": "a", "error": "b"}))).as_deref(), Some("a"));
        assert_eq!(server_message(Some(&json!({"error": "b"}))).as_deref(), Some("b"));
        assert_eq!(server_message(Some(&json!({"code": 3}))), None);
        assert_eq!(server_message(None), None);
    }

    #[test]
    fn bearer_header_is_attached() {
        let request = TransportRequest::new(Method::GET, "/users").with_bearer(Some(&Token::new("abc")));
        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer abc");

        let anonymous = TransportRequest::new(Method::GET, "/users").with_bearer(None);
        assert!(anonymous.headers().get(AUTHORIZATION).is_none());
    }
}
