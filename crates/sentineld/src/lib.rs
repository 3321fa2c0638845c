//! Application bootstrap for sentinel services.
//!
//! An [`Application`] takes the service identity and an [`AppOptions`] bag,
//! then runs a fixed dependency graph of bootstrap steps:
//!
//! 1. `logging` installs telemetry and records the startup event.
//! 2. `datasources` builds and connects the [`sentinel_datasource::Registry`]
//!    and is the only step with a shutdown hook.
//! 3. `auth` builds the token authenticator and role authorizer.
//! 4. `middleware` binds them into [`MiddlewareOptions`] and registers the
//!    datasource readiness check.
//! 5. `server` mounts the built-in health routes plus the caller's routes and
//!    builds the [`server::ServerRuntime`].
//!
//! The application then serves until a shutdown signal arrives and tears
//! the executed steps down in reverse order.

mod app;
pub mod auth;
mod error;
mod handles;
pub mod health;
mod initializers;
pub mod middleware;
mod options;
pub mod server;
pub mod telemetry;

pub use app::{AppInfo, Application, RegistrationFn};
pub use error::AppError;
pub use handles::Handle;
pub use health::{HealthManager, HealthReport};
pub use initializers::{AUTH, DATASOURCES, LOGGING, MIDDLEWARE, SERVER};
pub use middleware::MiddlewareOptions;
pub use options::AppOptions;

const APP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::app");

#[cfg(test)]
mod tests;
