//! Where revoked token ids are remembered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use sentinel_context::Context;
use sentinel_datasource::{KeyValue, RedisClient};

use super::error::RevocationError;

const KEY_PREFIX: &str = "sentinel:revoked:";

/// Storage for revoked token ids.
pub trait RevocationStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Remembers `token_id` as revoked for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns a [`RevocationError`] when the store cannot be written.
    fn revoke(&self, ctx: &Context, token_id: &str, ttl: Duration) -> Result<(), RevocationError>;

    /// Whether `token_id` is currently revoked.
    ///
    /// # Errors
    ///
    /// Returns a [`RevocationError`] when the store cannot be read.
    fn is_revoked(&self, ctx: &Context, token_id: &str) -> Result<bool, RevocationError>;
}

/// Process-local store. Revocations are not shared between replicas.
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryRevocationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RevocationStore for MemoryRevocationStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn revoke(&self, _ctx: &Context, token_id: &str, ttl: Duration) -> Result<(), RevocationError> {
        let expires = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token_id.to_owned(), expires);
        Ok(())
    }

    fn is_revoked(&self, _ctx: &Context, token_id: &str) -> Result<bool, RevocationError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, expires| *expires > now);
        Ok(entries.contains_key(token_id))
    }
}

/// Store backed by a Redis datasource's key-value capability.
#[derive(Debug)]
pub struct KvRevocationStore {
    client: Arc<RedisClient>,
}

impl KvRevocationStore {
    /// Uses `client` for storage.
    ///
    /// Returns `None` when the client offers no key-value access.
    #[must_use]
    pub fn new(client: Arc<RedisClient>) -> Option<Self> {
        client.key_value().is_some().then_some(Self { client })
    }

    fn store(&self) -> Result<&dyn KeyValue, RevocationError> {
        self.client
            .key_value()
            .ok_or_else(|| RevocationError::Unavailable {
                message: format!("redis datasource {} is closed", self.client.name()),
            })
    }
}

impl RevocationStore for KvRevocationStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn revoke(&self, ctx: &Context, token_id: &str, ttl: Duration) -> Result<(), RevocationError> {
        let key = format!("{KEY_PREFIX}{token_id}");
        self.store()?.set(ctx, &key, b"1", Some(ttl))?;
        Ok(())
    }

    fn is_revoked(&self, ctx: &Context, token_id: &str) -> Result<bool, RevocationError> {
        let key = format!("{KEY_PREFIX}{token_id}");
        Ok(self.store()?.get(ctx, &key)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sentinel_config::RedisOptions;
    use sentinel_datasource::Registry;
    use sentinel_datasource::test_support::StubDriver;

    fn redis_registry(driver: StubDriver) -> Registry {
        let registry = Registry::new().with_default_driver(driver);
        let options = RedisOptions {
            host: String::from("cache.internal"),
            ..RedisOptions::default()
        };
        registry.register_redis("default", &options).expect("register");
        registry
    }

    #[rstest]
    fn memory_entries_expire() {
        let store = MemoryRevocationStore::new();
        let ctx = Context::background();

        store.revoke(&ctx, "short", Duration::ZERO).expect("revoke");
        store.revoke(&ctx, "long", Duration::from_secs(60)).expect("revoke");

        assert!(!store.is_revoked(&ctx, "short").expect("lookup"));
        assert!(store.is_revoked(&ctx, "long").expect("lookup"));
        assert!(!store.is_revoked(&ctx, "unknown").expect("lookup"));
    }

    #[rstest]
    fn kv_store_round_trips_through_redis() {
        let registry = redis_registry(StubDriver::new().with_key_value());
        let client = registry.get_redis("default").expect("client");
        let store = KvRevocationStore::new(client).expect("key-value capable");
        let ctx = Context::background();

        store.revoke(&ctx, "abc", Duration::from_secs(60)).expect("revoke");

        assert!(store.is_revoked(&ctx, "abc").expect("lookup"));
        assert!(!store.is_revoked(&ctx, "def").expect("lookup"));
    }

    #[rstest]
    fn kv_store_needs_key_value_capability() {
        let registry = redis_registry(StubDriver::new());
        let client = registry.get_redis("default").expect("client");

        assert!(KvRevocationStore::new(client).is_none());
    }

    #[rstest]
    fn kv_store_reports_a_closed_client() {
        let registry = redis_registry(StubDriver::new().with_key_value());
        let client = registry.get_redis("default").expect("client");
        let store = KvRevocationStore::new(client).expect("key-value capable");
        registry.close_all().expect("close");

        let error = store
            .is_revoked(&Context::background(), "abc")
            .expect_err("closed");

        assert!(matches!(error, RevocationError::Unavailable { .. }));
    }
}
