//! Binds the auth components into middleware options and registers the
//! datasource readiness check.

use std::sync::Arc;

use tracing::info;

use sentinel_context::Context;
use sentinel_datasource::Registry;
use sentinel_graph::{BoxError, Initializer};

use super::{AUTH, BOOTSTRAP_TARGET, DATASOURCES, LOGGING, MIDDLEWARE, names};
use crate::auth::{RoleAuthorizer, TokenAuthenticator};
use crate::handles::Handle;
use crate::health::HealthManager;
use crate::middleware::MiddlewareOptions;

/// Name of the readiness check covering every datasource.
pub(crate) const DATASOURCES_CHECK: &str = "datasources";

pub(crate) struct MiddlewareInitializer {
    registry: Handle<Arc<Registry>>,
    authenticator: Handle<Arc<TokenAuthenticator>>,
    authorizer: Handle<Arc<RoleAuthorizer>>,
    health: Arc<HealthManager>,
    slot: Handle<Arc<MiddlewareOptions>>,
}

impl MiddlewareInitializer {
    pub(crate) const fn new(
        registry: Handle<Arc<Registry>>,
        authenticator: Handle<Arc<TokenAuthenticator>>,
        authorizer: Handle<Arc<RoleAuthorizer>>,
        health: Arc<HealthManager>,
        slot: Handle<Arc<MiddlewareOptions>>,
    ) -> Self {
        Self {
            registry,
            authenticator,
            authorizer,
            health,
            slot,
        }
    }
}

impl Initializer for MiddlewareInitializer {
    fn name(&self) -> &str {
        MIDDLEWARE
    }

    fn dependencies(&self) -> Vec<String> {
        names(&[LOGGING, DATASOURCES, AUTH])
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        let mut options = MiddlewareOptions::default();
        if let Some(authenticator) = self.authenticator.get() {
            options.auth.bind(authenticator);
        }
        if let Some(authorizer) = self.authorizer.get() {
            options.authz.bind(authorizer);
        }
        if let Some(registry) = self.registry.get() {
            self.health.register(DATASOURCES_CHECK, move |ctx| {
                if registry.is_healthy(ctx) {
                    Ok(())
                } else {
                    Err(String::from("one or more datasources are unhealthy"))
                }
            });
        }
        info!(
            target: BOOTSTRAP_TARGET,
            event = "middleware_ready",
            authentication = options.auth.authenticator().is_some(),
            authorization = options.authz.authorizer().is_some(),
            checks = ?self.health.names(),
            "middleware configured"
        );
        self.slot.publish(Arc::new(options));
        Ok(())
    }
}
