// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Token;

/// Holds the current credential.
///
/// Implementations decide where the token lives (memory, keychain, secure storage); the
/// broker only needs to read, replace and forget it.
pub trait TokenStore: Send + Sync + Debug {
    /// Returns the current token, if any.
    fn load(&self) -> Option<Token>;

    /// Replaces the current token.
    fn save(&self, token: &Token);

    /// Forgets the current token.
    fn clear(&self);
}

/// A [`TokenStore`] that keeps the token in memory.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<Token>>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `token`.
    #[must_use]
    pub fn with_token(token: Token) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(token))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<Token> {
        self.slot.lock().clone()
    }

    fn save(&self, token: &Token) {
        *self.slot.lock() = Some(token.clone());
    }

    fn clear(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_slot() {
        let store = MemoryTokenStore::new();
        let other = store.clone();

        store.save(&Token::new("a"));
        assert_eq!(other.load(), Some(Token::new("a")));

        other.clear();
        assert_eq!(store.load(), None);
    }
}
