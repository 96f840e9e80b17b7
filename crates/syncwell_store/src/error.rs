// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for persistent-tier operations.
//!
//! These errors are produced by [`PersistentKv`](crate::PersistentKv) implementations and
//! consumed by [`TieredStore`](crate::TieredStore), which never lets them escape.

/// An error from a persistent key/value backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KvError {
    /// The write would take the backend past its storage quota.
    ///
    /// The store reacts by pruning its oldest persisted entries.
    #[error("persistent storage quota exceeded")]
    QuotaExceeded,

    /// The backend is disabled or cannot be reached.
    #[error("persistent storage unavailable: {0}")]
    Unavailable(String),

    /// We are forwarding an error from the file system.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A stored document could not be encoded or decoded.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A specialized `Result` for persistent-tier operations.
pub type Result<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        assert_eq!(KvError::QuotaExceeded.to_string(), "persistent storage quota exceeded");
        assert_eq!(
            KvError::Unavailable("disabled".into()).to_string(),
            "persistent storage unavailable: disabled"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: KvError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, KvError::Io(_)));
        assert!(err.to_string().contains("disk gone"));
    }
}
