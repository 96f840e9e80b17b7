// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use futures::future::BoxFuture;

use crate::Token;

/// Error produced when a refresh cannot yield a new token.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RefreshError {
    /// The credential endpoint refused to issue a token.
    #[error("token refresh rejected: {0}")]
    Rejected(String),

    /// The credential endpoint answered without a usable token.
    #[error("token refresh response carried no token")]
    MissingToken,

    /// The credential endpoint could not be reached.
    #[error("token refresh transport failed")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Obtains a fresh credential.
///
/// The returned future is `'static` so that it can be shared between every caller that is
/// waiting for the same refresh.
#[cfg_attr(test, mockall::automock)]
pub trait TokenRefresher: Send + Sync {
    /// Starts a refresh.
    fn refresh(&self) -> BoxFuture<'static, Result<Token, RefreshError>>;
}
