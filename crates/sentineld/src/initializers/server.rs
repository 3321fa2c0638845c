//! Assembles the router and builds the server.

use std::sync::Arc;

use tracing::info;

use sentinel_config::ServerOptions;
use sentinel_context::Context;
use sentinel_datasource::Registry;
use sentinel_graph::{BoxError, Initializer};

use super::{BOOTSTRAP_TARGET, MIDDLEWARE, SERVER, Slots, names};
use crate::app::RegistrationFn;
use crate::health;
use crate::server::{Router, ServerFactory, ServerParts};

pub(crate) struct ServerInitializer {
    options: ServerOptions,
    factory: Arc<dyn ServerFactory>,
    registration: Option<Arc<RegistrationFn>>,
    slots: Slots,
}

impl ServerInitializer {
    pub(crate) fn new(
        options: ServerOptions,
        factory: Arc<dyn ServerFactory>,
        registration: Option<Arc<RegistrationFn>>,
        slots: Slots,
    ) -> Self {
        Self {
            options,
            factory,
            registration,
            slots,
        }
    }

    fn router(&self) -> Result<Router, BoxError> {
        let mut router = Router::new();
        health::install_routes(&mut router, &self.slots.health);
        if let Some(register) = &self.registration {
            let registry: Arc<Registry> = self
                .slots
                .registry
                .get()
                .ok_or("datasource registry was not published")?;
            let authenticator = self.slots.authenticator.get();
            register(&mut router, authenticator.as_ref(), &registry);
        }
        Ok(router)
    }
}

impl Initializer for ServerInitializer {
    fn name(&self) -> &str {
        SERVER
    }

    fn dependencies(&self) -> Vec<String> {
        names(&[MIDDLEWARE])
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        let router = self.router()?;
        let routes = router.len();
        let middleware = self.slots.middleware.get().unwrap_or_default();
        let runtime = self.factory.build(ServerParts {
            options: self.options.clone(),
            router,
            middleware,
        })?;
        info!(
            target: BOOTSTRAP_TARGET,
            event = "server_ready",
            address = %runtime.address(),
            routes,
            "server built"
        );
        self.slots.server.publish(runtime);
        Ok(())
    }
}
