// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::time::{Duration, SystemTime};

/// A bearer credential with an optional expiry instant.
///
/// The credential value never appears in `Debug` output.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
///
/// use syncwell_auth::Token;
///
/// let now = SystemTime::now();
/// let token = Token::with_expiry("abc", now + Duration::from_secs(60));
///
/// assert_eq!(token.bearer(), "Bearer abc");
/// assert!(!token.is_expired_at(now));
/// assert!(token.expires_within(now, Duration::from_secs(90)));
/// assert!(!format!("{token:?}").contains("abc"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    expires_at: Option<SystemTime>,
}

impl Token {
    /// Creates a token that never expires.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    /// Creates a token that expires at `expires_at`.
    #[must_use]
    pub fn with_expiry(value: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Returns the raw credential.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the expiry instant, if any.
    #[must_use]
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Returns the `Authorization` header value for this token.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }

    /// Returns `true` if the token is no longer valid at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Returns `true` if the token expires before `now + leeway`.
    #[must_use]
    pub fn expires_within(&self, now: SystemTime, leeway: Duration) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now + leeway)
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
