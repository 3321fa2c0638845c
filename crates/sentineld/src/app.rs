//! Application composition: options, bootstrap graph, serving and teardown.

use std::mem;
use std::sync::Arc;

use clap::Command;
use tracing::{error, info, info_span, warn};

use sentinel_config::{CompositeOptions, EnvSource, SystemEnv};
use sentinel_context::Context;
use sentinel_datasource::{Driver, Kind, Registry};
use sentinel_graph::{Initializer, InitializerGraph};

use crate::APP_TARGET;
use crate::auth::TokenAuthenticator;
use crate::error::AppError;
use crate::initializers::{
    AuthInitializer, DatasourceSet, DatasourcesInitializer, LoggingInitializer, MiddlewareInitializer,
    ServerInitializer, Slots,
};
use crate::options::{AppOptions, instance_of};
use crate::server::{
    Router, ServerFactory, ShutdownSignal, SocketServerFactory, SystemShutdownSignal,
};

/// Route registration hook. Receives the authenticator when auth is
/// enabled, and the datasource registry.
pub type RegistrationFn =
    dyn Fn(&mut Router, Option<&Arc<TokenAuthenticator>>, &Arc<Registry>) + Send + Sync;

/// Identity of the service being bootstrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// Service name.
    pub name: String,
    /// Service version.
    pub version: String,
    /// One-line description for `--help`.
    pub description: String,
}

impl AppInfo {
    /// Describes a service.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// A clap command carrying the service identity.
    #[must_use]
    pub fn command(&self) -> Command {
        Command::new(self.name.clone())
            .version(self.version.clone())
            .about(self.description.clone())
    }
}

/// A service assembled from the built-in bootstrap steps.
///
/// [`Application::run`] completes and validates the options, runs logging,
/// datasources, auth, middleware and server in dependency order, serves
/// until the shutdown signal fires, then tears everything down.
pub struct Application {
    info: AppInfo,
    options: AppOptions,
    env: Arc<dyn EnvSource>,
    drivers: Vec<(Kind, Arc<dyn Driver>)>,
    registration: Option<Arc<RegistrationFn>>,
    shutdown_signal: Option<Box<dyn ShutdownSignal>>,
    server_factory: Arc<dyn ServerFactory>,
    extra: Vec<Box<dyn Initializer>>,
    root: Context,
}

impl Application {
    /// Creates an application reading secrets from the process environment
    /// and serving with [`SocketServerFactory`].
    #[must_use]
    pub fn new(info: AppInfo, options: AppOptions) -> Self {
        Self {
            info,
            options,
            env: Arc::new(SystemEnv),
            drivers: Vec::new(),
            registration: None,
            shutdown_signal: None,
            server_factory: Arc::new(SocketServerFactory),
            extra: Vec::new(),
            root: Context::background(),
        }
    }

    /// Installs the route registration hook.
    #[must_use]
    pub fn with_registration(
        mut self,
        register: impl Fn(&mut Router, Option<&Arc<TokenAuthenticator>>, &Arc<Registry>)
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.registration = Some(Arc::new(register));
        self
    }

    /// Connects datasources of `kind` through `driver`.
    #[must_use]
    pub fn with_driver(mut self, kind: Kind, driver: impl Driver + 'static) -> Self {
        self.drivers.push((kind, Arc::new(driver)));
        self
    }

    /// Replaces the environment secrets are read from.
    #[must_use]
    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Replaces the OS signal listener.
    #[must_use]
    pub fn with_shutdown_signal(mut self, signal: impl ShutdownSignal + 'static) -> Self {
        self.shutdown_signal = Some(Box::new(signal));
        self
    }

    /// Replaces the server factory.
    #[must_use]
    pub fn with_server_factory(mut self, factory: impl ServerFactory + 'static) -> Self {
        self.server_factory = Arc::new(factory);
        self
    }

    /// Adds a bootstrap step. It may depend on any built-in step by name.
    #[must_use]
    pub fn with_initializer(mut self, initializer: impl Initializer + 'static) -> Self {
        self.extra.push(Box::new(initializer));
        self
    }

    /// The context bootstrap and serving run under. Cancelling it aborts a
    /// bootstrap in progress or stops the server like a shutdown signal.
    #[must_use]
    pub fn context(&self) -> Context {
        self.root.clone()
    }

    /// The service identity.
    #[must_use]
    pub const fn info(&self) -> &AppInfo {
        &self.info
    }

    /// The options as currently configured.
    #[must_use]
    pub const fn options(&self) -> &AppOptions {
        &self.options
    }

    /// Bootstraps, serves until shutdown, then tears down.
    ///
    /// Teardown runs even when a bootstrap step fails, covering the steps
    /// that did run.
    ///
    /// # Errors
    ///
    /// Returns the first failure: options, bootstrap, serving, then
    /// shutdown.
    pub fn run(mut self) -> Result<(), AppError> {
        self.options
            .complete()
            .map_err(|source| AppError::Options { source })?;
        self.options
            .validate(self.env.as_ref())
            .map_err(|source| AppError::Options { source })?;

        let slots = Slots::default();
        let initializers = self.initializers(&slots);
        let mut graph =
            InitializerGraph::build(initializers).map_err(|source| AppError::Bootstrap { source })?;

        let outcome = match graph.run(&self.root) {
            Ok(()) => self.serve(&graph, &slots),
            Err(source) => {
                error!(
                    target: APP_TARGET,
                    event = "bootstrap_failed",
                    error = %source,
                    "bootstrap failed"
                );
                Err(AppError::Bootstrap { source })
            }
        };
        let teardown = self.teardown(&mut graph, &slots);
        outcome.and(teardown)
    }

    fn initializers(&mut self, slots: &Slots) -> Vec<Box<dyn Initializer>> {
        let mut initializers: Vec<Box<dyn Initializer>> = vec![
            Box::new(LoggingInitializer::new(
                self.options.log.clone(),
                self.info.clone(),
                self.options.server.mode,
                slots.telemetry.clone(),
            )),
            Box::new(DatasourcesInitializer::new(
                DatasourceSet::from_options(&self.options),
                self.drivers.clone(),
                Arc::clone(&self.env),
                slots.registry.clone(),
            )),
            Box::new(AuthInitializer::new(
                self.options.jwt.clone(),
                instance_of(&self.options.redis).to_owned(),
                slots.registry.clone(),
                slots.authenticator.clone(),
                slots.authorizer.clone(),
            )),
            Box::new(MiddlewareInitializer::new(
                slots.registry.clone(),
                slots.authenticator.clone(),
                slots.authorizer.clone(),
                Arc::clone(&slots.health),
                slots.middleware.clone(),
            )),
            Box::new(ServerInitializer::new(
                self.options.server.clone(),
                Arc::clone(&self.server_factory),
                self.registration.clone(),
                slots.clone(),
            )),
        ];
        initializers.append(&mut mem::take(&mut self.extra));
        initializers
    }

    fn serve(&mut self, graph: &InitializerGraph, slots: &Slots) -> Result<(), AppError> {
        let mut server = slots.server.take().ok_or(AppError::ServerMissing)?;
        let address = server.address();
        info!(
            target: APP_TARGET,
            event = "ready",
            service = %self.info.name,
            version = %self.info.version,
            mode = %self.options.server.mode,
            order = ?graph.order(),
            address = %address,
            datasources = ?self.options.configured_datasources(),
            "{} {} ready on {address}",
            self.info.name,
            self.info.version
        );

        let span = info_span!(
            target: APP_TARGET,
            "service",
            service = %self.info.name,
            version = %self.info.version,
            mode = %self.options.server.mode
        );
        let _entered = span.enter();
        let signal = self
            .shutdown_signal
            .take()
            .unwrap_or_else(|| Box::new(SystemShutdownSignal::new(self.root.clone())));
        server
            .run(signal.as_ref())
            .map_err(|source| AppError::Server { source })
    }

    fn teardown(&self, graph: &mut InitializerGraph, slots: &Slots) -> Result<(), AppError> {
        let ctx = Context::background().with_timeout(self.options.server.shutdown_timeout);
        let result = graph.shutdown(&ctx).map_err(|source| {
            error!(
                target: APP_TARGET,
                event = "shutdown_failed",
                error = %source,
                "shutdown incomplete"
            );
            AppError::Shutdown { source }
        });
        if let Some(registry) = slots.registry.get()
            && let Err(close_error) = registry.close_all()
        {
            warn!(
                target: APP_TARGET,
                event = "close_failed",
                error = %close_error,
                "closing datasources failed"
            );
        }
        info!(
            target: APP_TARGET,
            event = "stopped",
            service = %self.info.name,
            "shutdown complete"
        );
        if let Some(telemetry) = slots.telemetry.get() {
            telemetry.flush();
        }
        result
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Application")
            .field("info", &self.info)
            .field("options", &self.options)
            .field("drivers", &self.drivers.iter().map(|(kind, _)| kind).collect::<Vec<_>>())
            .field("registration", &self.registration.is_some())
            .field("extra", &self.extra.len())
            .finish_non_exhaustive()
    }
}
