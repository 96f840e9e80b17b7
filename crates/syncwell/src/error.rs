// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode};

/// A request that never produced a response.
///
/// Cloning is cheap; the underlying cause is shared.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl TransportError {
    /// Creates an error with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error caused by `source`.
    #[must_use]
    pub fn with_source(message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a read session could not refresh its data.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The server-supplied message, or a generic description of the failure.
        message: String,
    },

    /// The response body was not the expected JSON.
    #[error("response body could not be decoded")]
    Decode(#[source] Arc<serde_json::Error>),

    /// The request could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Returns the response status, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a mutation failed.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum MutationError {
    /// The server answered with a non-success status, after any authorization retry.
    #[error("{message}")]
    Status {
        /// The request method.
        method: Method,
        /// The response status.
        status: StatusCode,
        /// The server-supplied message, or a generic description of the failure.
        message: String,
    },

    /// The request body could not be encoded.
    #[error("request body could not be encoded")]
    Encode(#[source] Arc<serde_json::Error>),

    /// The request could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl MutationError {
    /// Returns the response status, if the server answered.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Message used when a failed response carries none of its own.
pub(crate) fn generic_failure(method: &Method, status: StatusCode) -> String {
    format!("{method} request failed ({})", status.as_u16())
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn generic_failure_names_method_and_code() {
        assert_eq!(generic_failure(&Method::PATCH, StatusCode::CONFLICT), "PATCH request failed (409)");
    }

    #[test]
    fn transport_error_exposes_source() {
        let error = TransportError::with_source("connection reset", std::io::Error::other("reset by peer"));

        assert_eq!(error.to_string(), "connection reset");
        assert!(error.source().is_some());
        assert!(TransportError::new("offline").source().is_none());
    }
}
