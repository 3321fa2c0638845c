//! The seam between the registry and concrete store drivers.
//!
//! The registry never speaks a store's wire protocol. It hands a
//! [`ConnectRequest`] to a [`Driver`] and keeps the returned [`Connection`]
//! behind a typed client.

use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use sentinel_config::Endpoint;
use sentinel_context::{Context, ContextError};

use crate::kind::{Kind, KindOptions};

/// Errors reported by drivers and connections.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The options named no endpoint to dial.
    #[error("no endpoints configured")]
    NoEndpoints,
    /// Dialling every endpoint failed; the last failure is kept.
    #[error("failed to dial {endpoint}: {source}")]
    Dial {
        /// Endpoint that failed last.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The context ended before the operation finished.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// The connection was already closed.
    #[error("connection closed")]
    Closed,
    /// Driver specific failure.
    #[error("{message}")]
    Other {
        /// Description of the failure.
        message: String,
    },
}

impl DriverError {
    /// Creates a [`DriverError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Everything a driver needs to open a connection.
pub struct ConnectRequest {
    kind: Kind,
    name: String,
    endpoints: Vec<Endpoint>,
    username: String,
    database: Option<String>,
    connect_timeout: Duration,
    dsn: String,
    options: Arc<dyn Any + Send + Sync>,
}

impl ConnectRequest {
    /// Builds a request from validated options.
    #[must_use]
    pub fn from_options<O>(name: &str, options: &O) -> Self
    where
        O: KindOptions,
    {
        Self {
            kind: O::KIND,
            name: name.to_owned(),
            endpoints: options.endpoints(),
            username: options.username().to_owned(),
            database: options.database(),
            connect_timeout: options.connect_timeout(),
            dsn: options.dsn(),
            options: Arc::new(options.clone()),
        }
    }

    /// Kind of store being dialled.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Registry instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Servers to dial, in preference order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Logical database, when the store has one.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Upper bound for the connect attempt, before context clamping.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connection string with the secret masked.
    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Full typed options, including secrets, for drivers that need them.
    #[must_use]
    pub fn options<O>(&self) -> Option<&O>
    where
        O: KindOptions,
    {
        self.options.downcast_ref::<O>()
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectRequest")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("dsn", &self.dsn)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

/// Opens connections to one family of stores.
pub trait Driver: Send + Sync {
    /// Opens a connection, honouring the context deadline.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when no connection could be established.
    fn connect(
        &self,
        ctx: &Context,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Connection>, DriverError>;
}

impl<D> Driver for Arc<D>
where
    D: Driver + ?Sized,
{
    fn connect(
        &self,
        ctx: &Context,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Connection>, DriverError> {
        (**self).connect(ctx, request)
    }
}

/// A live connection, or pool of connections, to a store.
pub trait Connection: Send + Sync {
    /// Checks the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] describing why the store is unhealthy.
    fn ping(&self, ctx: &Context) -> Result<(), DriverError>;

    /// Releases the connection. Closing twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when teardown fails.
    fn close(&self) -> Result<(), DriverError>;

    /// Key-value capability, when the store offers one.
    fn key_value(&self) -> Option<&dyn KeyValue> {
        None
    }
}

/// Minimal key-value operations used by token revocation.
pub trait KeyValue: Send + Sync {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the store cannot be read.
    fn get(&self, ctx: &Context, key: &str) -> Result<Option<Vec<u8>>, DriverError>;

    /// Writes a value with an optional time to live.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the store cannot be written.
    fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), DriverError>;

    /// Removes a value, reporting whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`DriverError`] when the store cannot be written.
    fn delete(&self, ctx: &Context, key: &str) -> Result<bool, DriverError>;
}
