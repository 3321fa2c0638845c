//! Typed clients handed out by the registry.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sentinel_config::{EtcdOptions, MongoDbOptions, MySqlOptions, PostgresOptions, RedisOptions};
use sentinel_context::Context;

use crate::driver::{Connection, DriverError, KeyValue};
use crate::kind::{Kind, KindOptions};

/// Check returned by [`Client::health`].
pub type HealthCheckFn = Box<dyn Fn(&Context) -> Result<(), DriverError> + Send + Sync>;

/// A connected datasource together with the options it was built from.
pub struct Client<O> {
    name: String,
    options: O,
    connection: Box<dyn Connection>,
    closed: AtomicBool,
}

/// Client for a MySQL datasource.
pub type MySqlClient = Client<MySqlOptions>;
/// Client for a PostgreSQL datasource.
pub type PostgresClient = Client<PostgresOptions>;
/// Client for a Redis datasource.
pub type RedisClient = Client<RedisOptions>;
/// Client for a MongoDB datasource.
pub type MongoClient = Client<MongoDbOptions>;
/// Client for an etcd datasource.
pub type EtcdClient = Client<EtcdOptions>;

impl<O> Client<O>
where
    O: KindOptions,
{
    pub(crate) fn new(name: &str, options: O, connection: Box<dyn Connection>) -> Self {
        Self {
            name: name.to_owned(),
            options,
            connection,
            closed: AtomicBool::new(false),
        }
    }

    /// Instance name the client was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of store behind the client.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        O::KIND
    }

    /// Validated options the client was built from.
    #[must_use]
    pub const fn options(&self) -> &O {
        &self.options
    }

    /// Underlying driver connection.
    #[must_use]
    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    /// Key-value operations, when the driver offers them.
    #[must_use]
    pub fn key_value(&self) -> Option<&dyn KeyValue> {
        if self.is_closed() {
            return None;
        }
        self.connection.key_value()
    }

    /// Whether [`Client::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Checks the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Closed`] after close, otherwise the driver's
    /// ping failure.
    pub fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        self.connection.ping(ctx)
    }

    /// Closes the client. Only the first call reaches the driver.
    ///
    /// # Errors
    ///
    /// Returns the driver's close failure.
    pub fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.connection.close()
    }

    /// Builds a check suitable for a health manager.
    #[must_use]
    pub fn health(self: &Arc<Self>) -> HealthCheckFn {
        let client = Arc::clone(self);
        Box::new(move |ctx| client.ping(ctx))
    }
}

impl<O> fmt::Debug for Client<O>
where
    O: KindOptions,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Client")
            .field("kind", &O::KIND)
            .field("name", &self.name)
            .field("dsn", &self.options.dsn())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a [`Client`] used inside the registry.
pub trait DatasourceClient: Send + Sync {
    /// Instance name.
    fn name(&self) -> &str;

    /// Kind of store.
    fn kind(&self) -> Kind;

    /// Checks the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns the driver's ping failure.
    fn ping(&self, ctx: &Context) -> Result<(), DriverError>;

    /// Closes the client.
    ///
    /// # Errors
    ///
    /// Returns the driver's close failure.
    fn close(&self) -> Result<(), DriverError>;

    /// Converts into `Any` so callers can recover the concrete client.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<O> DatasourceClient for Client<O>
where
    O: KindOptions,
{
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn kind(&self) -> Kind {
        O::KIND
    }

    fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        Self::ping(self, ctx)
    }

    fn close(&self) -> Result<(), DriverError> {
        Self::close(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ConnectRequest, Driver};
    use crate::test_support::StubDriver;
    use rstest::rstest;

    fn client(driver: &StubDriver) -> Arc<RedisClient> {
        let options = RedisOptions {
            host: "cache".into(),
            ..RedisOptions::default()
        };
        let request = ConnectRequest::from_options("default", &options);
        let connection = driver
            .connect(&Context::background(), &request)
            .expect("connect");
        Arc::new(Client::new("default", options, connection))
    }

    #[rstest]
    fn close_reaches_driver_once() {
        let driver = StubDriver::new();
        let client = client(&driver);

        client.close().expect("close");
        client.close().expect("repeat close");

        assert_eq!(driver.closed(), vec![String::from("redis:default")]);
        assert!(matches!(
            client.ping(&Context::background()),
            Err(DriverError::Closed)
        ));
    }

    #[rstest]
    fn health_check_tracks_driver_state() {
        let driver = StubDriver::new();
        let client = client(&driver);
        let check = client.health();
        let ctx = Context::background();

        check(&ctx).expect("healthy");
        driver.fail_ping("redis:default", "connection reset");
        assert!(check(&ctx).is_err());
        driver.heal("redis:default");
        check(&ctx).expect("healthy again");
    }

    #[rstest]
    fn debug_output_masks_password() {
        let driver = StubDriver::new();
        let options = RedisOptions {
            host: "cache".into(),
            password: "hunter2".into(),
            ..RedisOptions::default()
        };
        let request = ConnectRequest::from_options("default", &options);
        let connection = driver
            .connect(&Context::background(), &request)
            .expect("connect");
        let client = Client::new("default", options, connection);

        let rendered = format!("{client:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redis://"));
    }
}
