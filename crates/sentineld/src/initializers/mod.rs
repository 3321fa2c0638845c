//! The built-in bootstrap steps.
//!
//! ```text
//! logging ─┬─> datasources ─> auth ─> middleware ─> server
//!          └──────────────────────────────────────────^
//! ```
//!
//! Steps exchange what they build through [`Slots`]; the graph only orders
//! them.

mod auth;
mod datasources;
mod logging;
mod middleware;
mod server;

use std::sync::Arc;

use sentinel_datasource::Registry;

use crate::auth::{RoleAuthorizer, TokenAuthenticator};
use crate::handles::Handle;
use crate::health::HealthManager;
use crate::middleware::MiddlewareOptions;
use crate::server::ServerRuntime;
use crate::telemetry::TelemetryHandle;

pub(crate) use self::auth::AuthInitializer;
pub(crate) use self::datasources::{DatasourceSet, DatasourcesInitializer};
pub(crate) use self::logging::LoggingInitializer;
pub(crate) use self::middleware::MiddlewareInitializer;
pub(crate) use self::server::ServerInitializer;

pub(crate) const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Name of the telemetry step.
pub const LOGGING: &str = "logging";
/// Name of the datasource step.
pub const DATASOURCES: &str = "datasources";
/// Name of the authentication step.
pub const AUTH: &str = "auth";
/// Name of the middleware step.
pub const MIDDLEWARE: &str = "middleware";
/// Name of the server step.
pub const SERVER: &str = "server";

/// Values published by one step for the steps after it.
#[derive(Clone, Default)]
pub(crate) struct Slots {
    pub(crate) telemetry: Handle<TelemetryHandle>,
    pub(crate) registry: Handle<Arc<Registry>>,
    pub(crate) authenticator: Handle<Arc<TokenAuthenticator>>,
    pub(crate) authorizer: Handle<Arc<RoleAuthorizer>>,
    pub(crate) middleware: Handle<Arc<MiddlewareOptions>>,
    pub(crate) server: Handle<Box<dyn ServerRuntime>>,
    pub(crate) health: Arc<HealthManager>,
}

fn names(dependencies: &[&str]) -> Vec<String> {
    dependencies.iter().map(|name| (*name).to_owned()).collect()
}
