//! Datasource registry for the sentinel bootstrap core.
//!
//! The [`Registry`] owns one client per `(kind, instance-name)` pair. Clients
//! are created through the [`Driver`] seam, either eagerly with
//! [`Registry::init_all`] or lazily on first lookup, and are shared as
//! [`Arc`](std::sync::Arc) handles until [`Registry::close_all`] retires the
//! registry. [`Registry::health_check_all`] pings every live client on a
//! bounded worker pool. A process-wide slot in [`global`] serves callers that
//! cannot have the registry passed to them.

mod client;
mod driver;
mod error;
pub mod global;
mod health;
mod kind;
mod registry;
mod tcp;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::{
    Client, DatasourceClient, EtcdClient, HealthCheckFn, MongoClient, MySqlClient, PostgresClient,
    RedisClient,
};
pub use driver::{ConnectRequest, Connection, Driver, DriverError, KeyValue};
pub use error::{CloseFailure, GlobalError, RegistryError};
pub use health::HealthStatus;
pub use kind::{Kind, KindOptions, KindParseError, make_key, parse_key};
pub use registry::{EntryState, Registry, TypedView};
pub use tcp::{TcpConnection, TcpDriver};

#[cfg(test)]
mod tests;
