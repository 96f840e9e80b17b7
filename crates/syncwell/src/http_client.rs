// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! `reqwest`-backed transport and credential refresher.

use std::time::{Duration, SystemTime};

use futures::FutureExt;
use futures::future::BoxFuture;
use http::HeaderMap;
use serde_json::Value;
use syncwell_auth::{RefreshError, Token, TokenRefresher};
use syncwell_store::system_clock;
use tick::Clock;

use crate::{Transport, TransportError, TransportRequest, TransportResponse};

/// Sends requests over HTTP, resolving resource keys against a base URL.
///
/// Keys that are absolute URLs are used as is.
///
/// # Examples
///
/// ```
/// use syncwell::HttpTransport;
///
/// let transport = HttpTransport::new("https://api.example.com/");
/// assert_eq!(transport.resolve("/users"), "https://api.example.com/users");
/// assert_eq!(transport.resolve("users"), "https://api.example.com/users");
/// assert_eq!(transport.resolve("https://cdn.example.com/a"), "https://cdn.example.com/a");
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a transport over a configured client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the absolute URL for `key`.
    #[must_use]
    pub fn resolve(&self, key: &str) -> String {
        if key.starts_with("http://") || key.starts_with("https://") {
            key.to_owned()
        } else if key.starts_with('/') {
            format!("{}{key}", self.base_url)
        } else {
            format!("{}/{key}", self.base_url)
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse, TransportError>> {
        let mut builder = self
            .client
            .request(request.method().clone(), self.resolve(request.url()))
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        async move {
            let response = builder
                .send()
                .await
                .map_err(|error| TransportError::with_source("request could not be sent", error))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|error| TransportError::with_source("response body could not be read", error))?;
            Ok(TransportResponse::new(status, headers, body))
        }
        .boxed()
    }
}

/// Refreshes credentials by posting to a refresh endpoint.
///
/// The JSON answer must carry the token in `token`, `accessToken` or `access_token`, at the
/// top level or under `data`, and may carry its lifetime in seconds as `expiresIn` or
/// `expires_in`.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    clock: Clock,
}

impl HttpRefresher {
    /// Creates a refresher for `endpoint`.
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            clock: system_clock(),
        }
    }

    /// Sends `headers` with every refresh request.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the clock used to turn lifetimes into expiry instants.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self) -> BoxFuture<'static, Result<Token, RefreshError>> {
        let request = self.client.post(&self.endpoint).headers(self.headers.clone());
        let clock = self.clock.clone();

        async move {
            let response = request.send().await.map_err(|error| RefreshError::Transport(Box::new(error)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(RefreshError::Rejected(format!("refresh endpoint answered {}", status.as_u16())));
            }
            let body: Value = response.json().await.map_err(|error| RefreshError::Transport(Box::new(error)))?;
            token_from_body(&body, clock.system_time())
        }
        .boxed()
    }
}

fn token_from_body(body: &Value, now: SystemTime) -> Result<Token, RefreshError> {
    let scope = body.get("data").filter(|data| data.is_object()).unwrap_or(body);
    let value = ["token", "accessToken", "access_token"]
        .iter()
        .find_map(|field| scope.get(field).and_then(Value::as_str))
        .ok_or(RefreshError::MissingToken)?;

    let lifetime = ["expiresIn", "expires_in"]
        .iter()
        .find_map(|field| scope.get(field).and_then(Value::as_u64));
    Ok(match lifetime {
        Some(seconds) => Token::with_expiry(value, now + Duration::from_secs(seconds)),
        None => Token::new(value),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn token_is_read_from_known_fields() {
        let now = SystemTime::now();

        let flat = token_from_body(&json!({"accessToken": "a", "expiresIn": 60}), now).unwrap();
        assert_eq!(flat.value(), "a");
        assert_eq!(flat.expires_at(), Some(now + Duration::from_secs(60)));

        let nested = token_from_body(&json!({"data": {"token": "b"}}), now).unwrap();
        assert_eq!(nested, Token::new("b"));
    }

    #[test]
    fn body_without_token_is_rejected() {
        let error = token_from_body(&json!({"ok": true}), SystemTime::now()).unwrap_err();
        assert!(matches!(error, RefreshError::MissingToken));
    }
}
