// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use http::Method;
use serde::de::DeserializeOwned;
use syncwell_auth::{BrokerBuilder, RefreshError, Token, TokenBroker, TokenRefresher, TokenStore};
use syncwell_store::{NoopKv, PersistentKv, TieredStore, system_clock};
use tick::Clock;

use crate::{ConfigError, Lifecycle, Mutation, MutationOptions, ReadOptions, ReadSession, SyncConfig, Transport};

/// Everything sessions and mutations share.
#[derive(Debug)]
pub(crate) struct ClientInner {
    pub(crate) store: Arc<TieredStore>,
    pub(crate) broker: TokenBroker,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) clock: Clock,
    pub(crate) config: SyncConfig,
}

/// Entry point that wires a store, a token broker and a transport together.
///
/// Cloning is cheap and clones share every collaborator.
///
/// # Examples
///
/// ```
/// use http::{Method, StatusCode};
/// use serde_json::json;
/// use syncwell::testing::{MockReply, MockTransport};
/// use syncwell::{MutationOptions, ReadOptions, SyncClient};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = MockTransport::replying(MockReply::json(StatusCode::OK, json!([1, 2, 3])));
/// let client = SyncClient::builder(transport).build().unwrap();
///
/// let users = client.read::<Vec<u32>>("/users", ReadOptions::new().immediate(false));
/// users.fetch_data(false).await;
/// assert_eq!(users.state().data, Some(vec![1, 2, 3]));
///
/// let create = client.mutation(Method::POST, "/users", MutationOptions::new().invalidate_keys(["/users"]));
/// create.mutate(&json!({"name": "Ada"})).await.unwrap();
/// assert!(!client.store().has("/users"));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

impl SyncClient {
    /// Creates a builder around `transport`.
    #[must_use]
    pub fn builder(transport: impl Transport + 'static) -> SyncClientBuilder {
        SyncClientBuilder::new(Arc::new(transport))
    }

    /// Begins observing `key`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; the session's triggers run as tasks.
    pub fn read<T>(&self, key: impl Into<String>, options: ReadOptions<T>) -> ReadSession<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        ReadSession::begin(Arc::clone(&self.inner), key.into(), options)
    }

    /// Creates a mutation call site for `method` requests to `endpoint`.
    #[must_use]
    pub fn mutation<B>(&self, method: Method, endpoint: impl Into<String>, options: MutationOptions<B>) -> Mutation<B> {
        Mutation::new(Arc::clone(&self.inner), method, endpoint.into(), options)
    }

    /// Returns the shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<TieredStore> {
        &self.inner.store
    }

    /// Returns the token broker.
    #[must_use]
    pub fn broker(&self) -> &TokenBroker {
        &self.inner.broker
    }

    /// Returns the lifecycle hub that drives passive revalidation.
    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

/// Builder for [`SyncClient`].
///
/// Unless given explicitly, the store is built from the configuration (volatile only, or over
/// [`persistent`](Self::persistent)), and the broker from [`refresher`](Self::refresher) and
/// [`token_store`](Self::token_store) with the configured leeway.
pub struct SyncClientBuilder {
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    clock: Option<Clock>,
    store: Option<Arc<TieredStore>>,
    persistent: Option<Arc<dyn PersistentKv>>,
    broker: Option<TokenBroker>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    token_store: Option<Arc<dyn TokenStore>>,
    lifecycle: Option<Lifecycle>,
}

impl std::fmt::Debug for SyncClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClientBuilder")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("store", &self.store)
            .field("persistent", &self.persistent)
            .field("broker", &self.broker)
            .field("refresher", &self.refresher.is_some())
            .field("token_store", &self.token_store)
            .finish_non_exhaustive()
    }
}

impl SyncClientBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: SyncConfig::default(),
            clock: None,
            store: None,
            persistent: None,
            broker: None,
            refresher: None,
            token_store: None,
            lifecycle: None,
        }
    }

    /// Applies `config`.
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock for cache timestamps and token expiry. Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses an existing store instead of building one.
    #[must_use]
    pub fn store(mut self, store: Arc<TieredStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Backs the built store with `persistent`.
    #[must_use]
    pub fn persistent(mut self, persistent: impl PersistentKv + 'static) -> Self {
        self.persistent = Some(Arc::new(persistent));
        self
    }

    /// Uses an existing broker instead of building one.
    #[must_use]
    pub fn broker(mut self, broker: TokenBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Refreshes credentials through `refresher`.
    #[must_use]
    pub fn refresher(mut self, refresher: impl TokenRefresher + 'static) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    /// Keeps credentials in `token_store`.
    #[must_use]
    pub fn token_store(mut self, token_store: impl TokenStore + 'static) -> Self {
        self.token_store = Some(Arc::new(token_store));
        self
    }

    /// Uses an existing lifecycle hub.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is out of range.
    pub fn build(self) -> Result<SyncClient, ConfigError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);

        let store = self.store.unwrap_or_else(|| {
            Arc::new(
                TieredStore::builder()
                    .capacity(self.config.store_capacity)
                    .prefix(self.config.store_prefix.clone())
                    .clock(clock.clone())
                    .shared_persistent(self.persistent.unwrap_or_else(|| Arc::new(NoopKv)))
                    .build(),
            )
        });

        let broker = self.broker.unwrap_or_else(|| {
            let refresher = self.refresher.unwrap_or_else(|| Arc::new(NoRefresh));
            let builder = BrokerBuilder::new(refresher)
                .clock(clock.clone())
                .leeway(self.config.token_refresh_leeway());
            let builder = match self.token_store {
                Some(token_store) => builder.shared_store(token_store),
                None => builder,
            };
            builder.build()
        });

        Ok(SyncClient {
            inner: Arc::new(ClientInner {
                store,
                broker,
                transport: self.transport,
                lifecycle: self.lifecycle.unwrap_or_default(),
                clock,
                config: self.config,
            }),
        })
    }
}

/// Refresher for clients that never authenticate.
struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh(&self) -> BoxFuture<'static, Result<Token, RefreshError>> {
        async { Err(RefreshError::Rejected("no token refresher configured".into())) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use syncwell_store::MemoryKv;

    use super::*;
    use crate::testing::{MockReply, MockTransport};

    #[test]
    fn store_is_built_from_config() {
        let config = SyncConfig {
            store_capacity: 7,
            store_prefix: "app_".into(),
            ..SyncConfig::default()
        };
        let persistent = MemoryKv::new();
        let client = SyncClient::builder(MockTransport::replying(MockReply::error("offline")))
            .config(config)
            .persistent(persistent.clone())
            .build()
            .unwrap();

        client.store().set("k", serde_json::json!(1));

        assert_eq!(client.store().capacity(), 7);
        assert_eq!(persistent.len(), 1);
        assert!(client.store().keys().contains("k"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig {
            store_capacity: 0,
            ..SyncConfig::default()
        };
        let result = SyncClient::builder(MockTransport::replying(MockReply::error("offline")))
            .config(config)
            .build();

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn anonymous_client_has_no_token() {
        let client = SyncClient::builder(MockTransport::replying(MockReply::error("offline")))
            .build()
            .unwrap();

        assert_eq!(client.broker().effective_token().await, None);
    }
}
