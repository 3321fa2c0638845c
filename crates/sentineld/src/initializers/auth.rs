//! Builds the token authenticator and role authorizer.

use std::sync::Arc;

use tracing::{info, warn};

use sentinel_config::JwtOptions;
use sentinel_context::Context;
use sentinel_datasource::{EntryState, Kind, Registry};
use sentinel_graph::{BoxError, Initializer};

use super::{AUTH, BOOTSTRAP_TARGET, DATASOURCES, LOGGING, names};
use crate::auth::{
    KvRevocationStore, MemoryRevocationStore, RevocationStore, RoleAuthorizer, TokenAuthenticator,
};
use crate::handles::Handle;

pub(crate) struct AuthInitializer {
    jwt: JwtOptions,
    redis_instance: String,
    registry: Handle<Arc<Registry>>,
    authenticator: Handle<Arc<TokenAuthenticator>>,
    authorizer: Handle<Arc<RoleAuthorizer>>,
}

impl AuthInitializer {
    pub(crate) const fn new(
        jwt: JwtOptions,
        redis_instance: String,
        registry: Handle<Arc<Registry>>,
        authenticator: Handle<Arc<TokenAuthenticator>>,
        authorizer: Handle<Arc<RoleAuthorizer>>,
    ) -> Self {
        Self {
            jwt,
            redis_instance,
            registry,
            authenticator,
            authorizer,
        }
    }

    /// Redis-backed revocations when a key-value capable Redis client is
    /// connected, process-local ones otherwise.
    fn revocation_store(&self) -> Arc<dyn RevocationStore> {
        let shared = self
            .registry
            .get()
            .filter(|registry| {
                registry.state(Kind::Redis, &self.redis_instance) == Some(EntryState::Initialized)
            })
            .and_then(|registry| registry.get_redis(&self.redis_instance).ok())
            .and_then(KvRevocationStore::new);
        if let Some(store) = shared {
            return Arc::new(store);
        }
        warn!(
            target: BOOTSTRAP_TARGET,
            event = "revocation_fallback",
            instance = %self.redis_instance,
            "redis unavailable; token revocations are kept in memory and not shared between replicas"
        );
        Arc::new(MemoryRevocationStore::new())
    }
}

impl Initializer for AuthInitializer {
    fn name(&self) -> &str {
        AUTH
    }

    fn dependencies(&self) -> Vec<String> {
        names(&[LOGGING, DATASOURCES])
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        if self.jwt.disable_auth {
            info!(
                target: BOOTSTRAP_TARGET,
                event = "auth_disabled",
                "authentication disabled"
            );
            return Ok(());
        }
        let authenticator = TokenAuthenticator::new(&self.jwt, self.revocation_store());
        info!(
            target: BOOTSTRAP_TARGET,
            event = "auth_ready",
            issuer = %self.jwt.issuer,
            revocations = authenticator.revocation_backend(),
            "authentication enabled"
        );
        self.authenticator.publish(Arc::new(authenticator));
        self.authorizer
            .publish(Arc::new(RoleAuthorizer::with_default_roles()));
        Ok(())
    }
}
